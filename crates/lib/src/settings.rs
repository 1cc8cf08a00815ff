//! Orchestrator settings.
//!
//! `Settings` is an immutable value handed to the [`Orchestrator`](crate::Orchestrator)
//! at construction time. Defaults can be overridden from the environment with
//! [`Settings::from_env`] and programmatically with the `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
  DEFAULT_FILE_EXTS, DEFAULT_LOCK_ATTEMPT_TIMEOUT, DEFAULT_LOCK_RETRY_DELAY, DEFAULT_LOCK_SUFFIX, DEFAULT_LOCK_TIMEOUT,
  ENV_BINDING_INCLUDE, ENV_FILE_EXTS, ENV_FORCE_REBUILD, ENV_GLOBAL_SYMBOLS, ENV_LOCK_TIMEOUT, ENV_RELEASE_MODE,
};

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("invalid boolean in {var}: {value:?} (expected true/false, 1/0, yes/no or on/off)")]
  InvalidBool { var: &'static str, value: String },

  #[error("invalid duration in {var}: {source}")]
  InvalidDuration {
    var: &'static str,
    #[source]
    source: humantime::DurationError,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Treat every artifact as stale.
  pub force_rebuild: bool,
  /// Never compile; existing artifacts are authoritative even when stale.
  pub release_mode: bool,
  /// Source extensions tried by the resolver, in order.
  pub file_extensions: Vec<String>,
  /// Overall time a process waits for a concurrent build to finish.
  pub lock_timeout: Duration,
  /// Appended to the artifact path to name its lock file.
  pub lock_suffix: String,
  /// Time spent on a single lock attempt before polling again.
  pub lock_attempt_timeout: Duration,
  /// Pause between lock attempts.
  pub lock_retry_delay: Duration,
  /// File name suffix of compiled artifacts.
  pub artifact_suffix: String,
  /// Include directories added by the `setup_binding` template helper.
  pub binding_include_dirs: Vec<PathBuf>,
  /// Load artifacts with their symbols visible to libraries loaded later.
  pub global_symbols: bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      force_rebuild: false,
      release_mode: false,
      file_extensions: DEFAULT_FILE_EXTS.iter().map(|e| e.to_string()).collect(),
      lock_timeout: DEFAULT_LOCK_TIMEOUT,
      lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
      lock_attempt_timeout: DEFAULT_LOCK_ATTEMPT_TIMEOUT,
      lock_retry_delay: DEFAULT_LOCK_RETRY_DELAY,
      artifact_suffix: std::env::consts::DLL_SUFFIX.to_string(),
      binding_include_dirs: Vec::new(),
      global_symbols: false,
    }
  }
}

impl Settings {
  /// Defaults overridden by `EXTBUILD_*` environment variables.
  pub fn from_env() -> Result<Self, SettingsError> {
    let mut settings = Self::default();

    if let Some(value) = env_var(ENV_FORCE_REBUILD) {
      settings.force_rebuild = parse_bool(ENV_FORCE_REBUILD, &value)?;
    }
    if let Some(value) = env_var(ENV_RELEASE_MODE) {
      settings.release_mode = parse_bool(ENV_RELEASE_MODE, &value)?;
    }
    if let Some(value) = env_var(ENV_GLOBAL_SYMBOLS) {
      settings.global_symbols = parse_bool(ENV_GLOBAL_SYMBOLS, &value)?;
    }
    if let Some(value) = env_var(ENV_FILE_EXTS) {
      settings.file_extensions = value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(normalize_extension)
        .collect();
    }
    if let Some(value) = env_var(ENV_LOCK_TIMEOUT) {
      settings.lock_timeout = humantime::parse_duration(&value).map_err(|source| SettingsError::InvalidDuration {
        var: ENV_LOCK_TIMEOUT,
        source,
      })?;
    }
    if let Some(value) = std::env::var_os(ENV_BINDING_INCLUDE) {
      settings.binding_include_dirs = std::env::split_paths(&value).collect();
    }

    Ok(settings)
  }

  pub fn with_force_rebuild(mut self, force: bool) -> Self {
    self.force_rebuild = force;
    self
  }

  pub fn with_release_mode(mut self, release: bool) -> Self {
    self.release_mode = release;
    self
  }

  pub fn with_file_extensions<I, S>(mut self, exts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.file_extensions = exts.into_iter().map(|e| normalize_extension(e.as_ref())).collect();
    self
  }

  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.lock_timeout = timeout;
    self
  }

  pub fn with_lock_suffix(mut self, suffix: &str) -> Self {
    self.lock_suffix = suffix.to_string();
    self
  }

  pub fn with_lock_polling(mut self, attempt_timeout: Duration, retry_delay: Duration) -> Self {
    self.lock_attempt_timeout = attempt_timeout;
    self.lock_retry_delay = retry_delay;
    self
  }

  pub fn with_artifact_suffix(mut self, suffix: &str) -> Self {
    self.artifact_suffix = suffix.to_string();
    self
  }

  pub fn with_binding_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
    self.binding_include_dirs = dirs;
    self
  }

  pub fn with_global_symbols(mut self, global: bool) -> Self {
    self.global_symbols = global;
    self
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, SettingsError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(SettingsError::InvalidBool {
      var,
      value: value.to_string(),
    }),
  }
}

/// `cpp` and `.cpp` both mean `.cpp`.
fn normalize_extension(ext: &str) -> String {
  if ext.starts_with('.') {
    ext.to_string()
  } else {
    format!(".{}", ext)
  }
}
