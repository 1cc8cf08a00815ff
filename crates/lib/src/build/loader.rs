//! The load step.
//!
//! A [`Loader`] turns a built artifact into a usable module handle. The
//! orchestrator treats loading as idempotent and side-effect free on the
//! filesystem, so any number of processes may load the same artifact.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("artifact not found: {}", .0.display())]
  NotFound(PathBuf),

  #[error("failed to load {}: {message}", path.display())]
  Open { path: PathBuf, message: String },

  #[error("{} has no entry point '{symbol}'", path.display())]
  MissingEntry { path: PathBuf, symbol: String },
}

pub trait Loader {
  type Module;

  /// Load the artifact at `artifact` as module `fullname`.
  fn load(&self, fullname: &str, artifact: &Path) -> Result<Self::Module, LoadError>;
}

impl<T: Loader + ?Sized> Loader for &T {
  type Module = T::Module;

  fn load(&self, fullname: &str, artifact: &Path) -> Result<Self::Module, LoadError> {
    (**self).load(fullname, artifact)
  }
}

/// Opens artifacts as shared libraries.
///
/// With an entry prefix configured, a library only counts as loaded when it
/// exports `<prefix><last name segment>`, which catches artifacts built for
/// another module or ABI.
///
/// With global symbols enabled, a library's exports resolve symbols of
/// libraries loaded after it (`RTLD_GLOBAL`). Windows has no such scope and
/// ignores the setting.
#[derive(Debug, Clone, Default)]
pub struct DylibLoader {
  entry_prefix: Option<String>,
  global_symbols: bool,
}

impl DylibLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_entry_prefix(mut self, prefix: &str) -> Self {
    self.entry_prefix = Some(prefix.to_string());
    self
  }

  pub fn with_global_symbols(mut self, global: bool) -> Self {
    self.global_symbols = global;
    self
  }

  pub fn global_symbols(&self) -> bool {
    self.global_symbols
  }

  fn entry_symbol(&self, fullname: &str) -> Option<String> {
    let short_name = fullname.rsplit('.').next().unwrap_or(fullname);
    self.entry_prefix.as_ref().map(|prefix| format!("{}{}", prefix, short_name))
  }
}

impl Loader for DylibLoader {
  type Module = LoadedModule;

  fn load(&self, fullname: &str, artifact: &Path) -> Result<LoadedModule, LoadError> {
    if !artifact.exists() {
      return Err(LoadError::NotFound(artifact.to_path_buf()));
    }

    debug!(
      module = %fullname,
      path = %artifact.display(),
      global = self.global_symbols,
      "opening shared library"
    );

    // SAFETY: loading a library runs its initializers. The artifact was built
    // from a source the caller asked for by name, which is the trust boundary
    // of this tool.
    let library = unsafe { open_library(artifact, self.global_symbols) }.map_err(|e| LoadError::Open {
      path: artifact.to_path_buf(),
      message: e.to_string(),
    })?;

    let module = LoadedModule {
      name: fullname.to_string(),
      path: artifact.to_path_buf(),
      library,
    };

    if let Some(symbol) = self.entry_symbol(fullname)
      && !module.has_symbol(&symbol)
    {
      return Err(LoadError::MissingEntry {
        path: artifact.to_path_buf(),
        symbol,
      });
    }

    Ok(module)
  }
}

#[cfg(unix)]
unsafe fn open_library(path: &Path, global: bool) -> Result<Library, libloading::Error> {
  use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW};

  let scope = if global { RTLD_GLOBAL } else { RTLD_LOCAL };
  unsafe { UnixLibrary::open(Some(path), RTLD_NOW | scope) }.map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path, _global: bool) -> Result<Library, libloading::Error> {
  unsafe { Library::new(path) }
}

/// A loaded artifact. The library stays open for the lifetime of the value.
#[derive(Debug)]
pub struct LoadedModule {
  pub name: String,
  pub path: PathBuf,
  library: Library,
}

impl LoadedModule {
  pub fn has_symbol(&self, name: &str) -> bool {
    // SAFETY: the symbol is only looked up, never called, so its type is irrelevant.
    unsafe { self.library.get::<*const ()>(name.as_bytes()).is_ok() }
  }

  /// Look up an exported symbol.
  ///
  /// # Safety
  ///
  /// `T` must match the actual type of the exported symbol.
  pub unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>, LoadError> {
    unsafe { self.library.get::<T>(name.as_bytes()) }.map_err(|_| LoadError::MissingEntry {
      path: self.path.clone(),
      symbol: name.to_string(),
    })
  }
}
