use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use extbuild_lib::{CommandCompiler, SearchPath, Settings};

use super::load_settings;
use crate::output::{print_json, print_stat};

#[derive(Serialize)]
struct InfoReport {
  version: &'static str,
  compiler: String,
  search_path: Vec<PathBuf>,
  settings: Settings,
}

pub fn cmd_info(lock_timeout: Option<Duration>, json: bool) -> Result<()> {
  let report = InfoReport {
    version: env!("CARGO_PKG_VERSION"),
    compiler: CommandCompiler::from_env().program().to_string(),
    search_path: SearchPath::from_env().entries().to_vec(),
    settings: load_settings(lock_timeout)?,
  };

  if json {
    return print_json(&report);
  }

  let settings = &report.settings;
  println!("extbuild {}", report.version);
  print_stat("Compiler", &report.compiler);
  print_stat("Search path", &describe_search_path(&report.search_path));
  print_stat("Extensions", &settings.file_extensions.join(", "));
  print_stat("Artifact suffix", &settings.artifact_suffix);
  print_stat("Force rebuild", &settings.force_rebuild.to_string());
  print_stat("Release mode", &settings.release_mode.to_string());
  print_stat("Global symbols", &settings.global_symbols.to_string());
  print_stat("Lock timeout", &humantime::format_duration(settings.lock_timeout).to_string());
  if !settings.binding_include_dirs.is_empty() {
    let dirs: Vec<String> = settings
      .binding_include_dirs
      .iter()
      .map(|d| d.display().to_string())
      .collect();
    print_stat("Binding includes", &dirs.join(", "));
  }

  Ok(())
}

fn describe_search_path(entries: &[PathBuf]) -> String {
  entries
    .iter()
    .map(|entry| {
      if entry.as_os_str().is_empty() {
        "<current directory>".to_string()
      } else {
        entry.display().to_string()
      }
    })
    .collect::<Vec<_>>()
    .join(", ")
}
