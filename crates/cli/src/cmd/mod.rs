mod build;
mod info;
mod resolve;
mod run;
mod status;

use std::time::Duration;

use anyhow::{Context, Result};
use extbuild_lib::Settings;

pub use build::{BuildOptions, cmd_build};
pub use info::cmd_info;
pub use resolve::cmd_resolve;
pub use run::{RunOptions, cmd_run};
pub use status::cmd_status;

/// Settings from `EXTBUILD_*`, with the global `--lock-timeout` on top.
fn load_settings(lock_timeout: Option<Duration>) -> Result<Settings> {
  let settings = Settings::from_env().context("Invalid EXTBUILD_* environment")?;
  Ok(match lock_timeout {
    Some(timeout) => settings.with_lock_timeout(timeout),
    None => settings,
  })
}
