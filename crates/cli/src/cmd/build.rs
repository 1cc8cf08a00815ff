//! Implementation of the `extbuild build` command.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use extbuild_lib::{CommandCompiler, DylibLoader, Orchestrator, SearchPath};

use super::load_settings;
use crate::output::{format_duration, print_info, print_success, symbols};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  pub force: bool,
  pub release: bool,
  pub lock_timeout: Option<Duration>,
}

/// Bring every artifact under `paths` up to date.
///
/// Directories are walked for sources carrying the opt-in marker. Files are
/// built as given, named after their stem. Stops at the first failure.
pub fn cmd_build(paths: &[PathBuf], options: &BuildOptions) -> Result<()> {
  let mut settings = load_settings(options.lock_timeout)?;
  if options.force {
    settings = settings.with_force_rebuild(true);
  }
  if options.release {
    settings = settings.with_release_mode(true);
  }
  let compiler = CommandCompiler::from_env();
  info!(compiler = %compiler.program(), "using compiler");

  let loader = DylibLoader::new().with_global_symbols(settings.global_symbols);
  let orchestrator = Orchestrator::new(settings, SearchPath::from_env(), compiler, loader);

  let start = Instant::now();
  let mut artifacts = Vec::new();
  for path in paths {
    artifacts.extend(build_path(&orchestrator, path)?);
  }

  if artifacts.is_empty() {
    print_info("No opted-in sources found.");
    return Ok(());
  }

  for artifact in &artifacts {
    println!("  {} {}", symbols::ARROW, artifact.display());
  }
  print_success(&format!(
    "{} module(s) up to date in {}",
    artifacts.len(),
    format_duration(start.elapsed())
  ));

  Ok(())
}

fn build_path(orchestrator: &Orchestrator<CommandCompiler, DylibLoader>, path: &Path) -> Result<Vec<PathBuf>> {
  let path = dunce::canonicalize(path).with_context(|| format!("Cannot access {}", path.display()))?;

  if path.is_dir() {
    orchestrator
      .build_all(&path)
      .with_context(|| format!("Failed to build sources below {}", path.display()))
  } else {
    let artifact = orchestrator
      .build_filepath(&path)
      .with_context(|| format!("Failed to build {}", path.display()))?;
    Ok(vec![artifact])
  }
}
