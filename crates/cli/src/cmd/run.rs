//! Implementation of the `extbuild run` command.

use std::os::raw::c_int;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use extbuild_lib::consts::RUN_ENTRY_SYMBOL;
use extbuild_lib::{CommandCompiler, DylibLoader, Orchestrator, SearchPath};

use super::load_settings;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub global_symbols: bool,
  pub lock_timeout: Option<Duration>,
}

type EntryPoint = unsafe extern "C" fn() -> c_int;

/// Build `file` if needed, load it and call its `main`. Returns what `main`
/// returned.
pub fn cmd_run(file: &Path, options: &RunOptions) -> Result<i32> {
  let mut settings = load_settings(options.lock_timeout)?;
  if options.global_symbols {
    settings = settings.with_global_symbols(true);
  }
  let filepath = dunce::canonicalize(file).with_context(|| format!("Cannot access {}", file.display()))?;

  let compiler = CommandCompiler::from_env();
  info!(compiler = %compiler.program(), "using compiler");
  let loader = DylibLoader::new().with_global_symbols(settings.global_symbols);
  let orchestrator = Orchestrator::new(settings, SearchPath::from_env(), compiler, loader);

  let module = orchestrator
    .load_module(&filepath, None)
    .with_context(|| format!("Failed to load {}", filepath.display()))?;

  // SAFETY: a runnable module exports `int main(void)` with C linkage.
  let entry = unsafe { module.symbol::<EntryPoint>(RUN_ENTRY_SYMBOL) }
    .with_context(|| format!("{} cannot be run", filepath.display()))?;

  debug!(module = %module.name, "launching");
  // SAFETY: see above; the library stays loaded while `module` is alive.
  let code = unsafe { entry() };
  Ok(code)
}
