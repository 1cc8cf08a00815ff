//! Module name to source file resolution.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::{ENV_SEARCH_PATH, OPT_IN_MARKER};
use crate::settings::Settings;
use crate::util::paths::{first_line_contains, make_absolute};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("no source file found for module '{module}'{}", if *opt_in { " (with opt-in marker)" } else { "" })]
  NotFound { module: String, opt_in: bool },

  #[error("cannot determine current directory: {0}")]
  CurrentDir(#[source] io::Error),
}

/// Ordered directories searched for module sources. An empty entry stands
/// for the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath(Vec<PathBuf>);

impl SearchPath {
  pub fn new<I, P>(entries: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    Self(entries.into_iter().map(Into::into).collect())
  }

  /// Just the current directory.
  pub fn current_dir() -> Self {
    Self(vec![PathBuf::new()])
  }

  /// `EXTBUILD_PATH` split with the platform's path list syntax, or the
  /// current directory when unset.
  pub fn from_env() -> Self {
    match std::env::var_os(ENV_SEARCH_PATH) {
      Some(value) if !value.is_empty() => Self::from_path_list(&value),
      _ => Self::current_dir(),
    }
  }

  fn from_path_list(value: &OsString) -> Self {
    Self(std::env::split_paths(value).collect())
  }

  pub fn entries(&self) -> &[PathBuf] {
    &self.0
  }
}

impl Default for SearchPath {
  fn default() -> Self {
    Self::current_dir()
  }
}

/// Find the source file for `fullname`.
///
/// Extensions are tried in `settings.file_extensions` order and, for each,
/// the search path entries in order; the first existing regular file wins.
/// With `opt_in`, candidates whose first line lacks the opt-in marker are
/// skipped.
pub fn resolve(fullname: &str, opt_in: bool, search_path: &SearchPath, settings: &Settings) -> Result<PathBuf, ResolveError> {
  let cwd = std::env::current_dir().map_err(ResolveError::CurrentDir)?;

  let mut segments: Vec<&str> = fullname.split('.').collect();
  let last = segments.pop().unwrap_or(fullname);
  let module_dir: PathBuf = segments.iter().collect();

  let candidate_dirs: Vec<PathBuf> = search_path
    .entries()
    .iter()
    .map(|entry| make_absolute(&cwd, entry))
    .filter(|entry| entry.is_dir())
    .map(|entry| if segments.is_empty() { entry } else { entry.join(&module_dir) })
    .filter(|dir| dir.is_dir())
    .collect();

  for ext in &settings.file_extensions {
    let filename = format!("{}{}", last, ext);
    for dir in &candidate_dirs {
      let candidate = dir.join(&filename);
      if !candidate.is_file() {
        continue;
      }
      if opt_in && !has_opt_in_marker(&candidate) {
        debug!(path = %candidate.display(), "skipping candidate without opt-in marker");
        continue;
      }
      debug!(module = %fullname, path = %candidate.display(), "resolved module");
      return Ok(candidate);
    }
  }

  Err(ResolveError::NotFound {
    module: fullname.to_string(),
    opt_in,
  })
}

/// Whether the first line of `path` carries the opt-in marker. Unreadable
/// files don't.
pub fn has_opt_in_marker(path: &Path) -> bool {
  first_line_contains(path, OPT_IN_MARKER).unwrap_or(false)
}
