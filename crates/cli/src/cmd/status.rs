//! Status command implementation.
//!
//! Reads the checksum trailer of an artifact and reports whether its recorded
//! dependencies still hash to the recorded digest.

use std::path::Path;

use anyhow::{Context, Result};

use extbuild_lib::checksum::{self, Staleness};

use crate::output::{print_json, print_stat, print_success, print_warning, symbols, truncate_hash};

pub fn cmd_status(artifact: &Path, json: bool) -> Result<()> {
  let trailer = checksum::read_trailer(artifact).with_context(|| format!("Cannot inspect {}", artifact.display()))?;
  let stale: Option<Staleness> = checksum::verify(artifact).err();

  if json {
    let json_output = serde_json::json!({
      "artifact": artifact,
      "up_to_date": stale.is_none(),
      "reason": stale.as_ref().map(ToString::to_string),
      "hash": trailer.hash.0,
      "deps": trailer.deps,
    });
    return print_json(&json_output);
  }

  match &stale {
    None => print_success(&format!("{} is up to date", artifact.display())),
    Some(reason) => print_warning(&format!("{} is stale: {}", artifact.display(), reason)),
  }
  print_stat("Hash", truncate_hash(&trailer.hash.0));
  print_stat("Dependencies", &trailer.deps.len().to_string());
  for dep in &trailer.deps {
    println!("    {} {}", symbols::INFO, dep.display());
  }

  Ok(())
}
