//! Template rendering and build configuration extraction.
//!
//! A source file is treated as a template. Embedded Lua code fills in the
//! `cfg` table and may generate source text; the rendered text is written to
//! a hidden sibling (`.rendered.<basename>`) which is what gets compiled.

pub mod config;
mod lua;
mod syntax;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};

pub use config::{BuildConfig, ConfigError, ConfigKey, ConfigValue, canonical_key};

use crate::consts::RENDERED_PREFIX;
use crate::settings::Settings;

/// A rendered source and the configuration its template code produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSource {
  pub path: PathBuf,
  pub config: BuildConfig,
}

#[derive(Debug, Error)]
pub enum RenderError {
  #[error("{}:{line}: {message}", path.display())]
  Syntax {
    path: PathBuf,
    line: usize,
    message: String,
  },

  #[error("template code in {} failed: {message}", path.display())]
  Lua { path: PathBuf, message: String },

  #[error("failed to {action} {}: {source}", path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Where the rendered sibling of `filepath` is written.
pub fn rendered_source_path(filepath: &Path) -> PathBuf {
  let basename = filepath
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  filepath
    .parent()
    .unwrap_or(Path::new(""))
    .join(format!("{}{}", RENDERED_PREFIX, basename))
}

/// Render `source` for module `fullname`.
///
/// On failure nothing is written and the template's error is returned.
pub fn render(source: &Path, fullname: &str, settings: &Settings) -> Result<RenderedSource, RenderError> {
  let bytes = fs::read(source).map_err(|e| RenderError::Io {
    action: "read",
    path: source.to_path_buf(),
    source: e,
  })?;

  let segments = syntax::parse(&bytes).map_err(|e| RenderError::Syntax {
    path: source.to_path_buf(),
    line: e.line,
    message: e.message,
  })?;
  let chunk = syntax::to_chunk(&segments);

  let evaluated = lua::evaluate(&chunk, source, fullname, settings).map_err(|e| {
    error!(module = %fullname, path = %source.display(), error = %e, "template code failed");
    RenderError::Lua {
      path: source.to_path_buf(),
      message: e.to_string(),
    }
  })?;

  let path = rendered_source_path(source);
  write_atomically(&path, &evaluated.text).map_err(|e| RenderError::Io {
    action: "write",
    path: path.clone(),
    source: e,
  })?;

  debug!(module = %fullname, rendered = %path.display(), config = ?evaluated.config, "rendered template");

  Ok(RenderedSource {
    path,
    config: evaluated.config,
  })
}

fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
  let dir = path.parent().unwrap_or(Path::new("."));
  let mut file = tempfile::NamedTempFile::new_in(dir)?;
  file.write_all(contents)?;
  file.persist(path).map_err(|e| e.error)?;
  Ok(())
}
