//! The build coordinator.
//!
//! Every request goes through the same steps:
//!
//! 1. resolve the module name to a source file (`imp`, `build`, `import_hook`)
//! 2. decide whether the artifact is stale (`is_build_needed`)
//! 3. try to load a fresh artifact; a failed load counts as stale
//! 4. rebuild under the cross-process lock (`build_safely`)
//! 5. load the result
//!
//! Concurrent builders of the same module, in this process or others, are
//! serialized by the lock file next to the artifact. Whoever gets the lock
//! first builds; everyone else sees a complete artifact once the lock frees
//! up and loads it without compiling.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::build::{ArtifactStamp, CompileError, Compiler, LoadError, Loader, ModuleBuild};
use crate::checksum::{self, ChecksumError};
use crate::consts::RENDERED_PREFIX;
use crate::lock::{self, BuildLock, LockError};
use crate::resolve::{ResolveError, SearchPath, has_opt_in_marker, resolve};
use crate::settings::Settings;
use crate::template::{self, RenderError};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Render(#[from] RenderError),

  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error(transparent)]
  Load(#[from] LoadError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(
    "gave up building {module} after {}: {} is held{}\n\
     If no other build is running, remove the lock file and retry.",
    humantime::format_duration(*waited),
    lock_path.display(),
    describe_holder(*pid)
  )]
  LockTimeout {
    module: String,
    pid: Option<u32>,
    waited: Duration,
    lock_path: PathBuf,
  },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("module '{0}' is already being built on this thread")]
  Reentrant(String),

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("failed to walk source tree: {0}")]
  Walk(#[from] walkdir::Error),
}

fn describe_holder(pid: Option<u32>) -> String {
  pid.map(|pid| format!(" by process {}", pid)).unwrap_or_default()
}

/// Where a request currently is. Only used for debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
  NeedCheck,
  Fresh,
  Stale,
  Locking,
  Building,
  Stamped,
  Loading,
  Loaded,
  Failed,
}

impl fmt::Display for BuildPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BuildPhase::NeedCheck => "need-check",
      BuildPhase::Fresh => "fresh",
      BuildPhase::Stale => "stale",
      BuildPhase::Locking => "locking",
      BuildPhase::Building => "building",
      BuildPhase::Stamped => "stamped",
      BuildPhase::Loading => "loading",
      BuildPhase::Loaded => "loaded",
      BuildPhase::Failed => "failed",
    };
    f.write_str(name)
  }
}

fn enter_phase(module: &ModuleBuild, phase: BuildPhase) {
  debug!(module = %module.fullname, phase = %phase, "build phase");
}

/// Builds and loads native modules on demand.
///
/// `Sync` whenever the compiler and loader are, so one instance can serve
/// many threads.
pub struct Orchestrator<C, L> {
  settings: Settings,
  search_path: SearchPath,
  compiler: C,
  loader: L,
  /// Modules each thread is currently inside of.
  in_progress: Mutex<HashSet<(ThreadId, String)>>,
}

/// Marks a module as in progress on the current thread until dropped.
struct InProgressGuard<'a> {
  set: &'a Mutex<HashSet<(ThreadId, String)>>,
  key: (ThreadId, String),
}

impl Drop for InProgressGuard<'_> {
  fn drop(&mut self) {
    self.set.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.key);
  }
}

impl<C: Compiler, L: Loader> Orchestrator<C, L> {
  pub fn new(settings: Settings, search_path: SearchPath, compiler: C, loader: L) -> Self {
    Self {
      settings,
      search_path,
      compiler,
      loader,
      in_progress: Mutex::new(HashSet::new()),
    }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn search_path(&self) -> &SearchPath {
    &self.search_path
  }

  pub fn compiler(&self) -> &C {
    &self.compiler
  }

  pub fn loader(&self) -> &L {
    &self.loader
  }

  /// Resolve `fullname` on the search path and load it, building first if
  /// needed.
  pub fn imp(&self, fullname: &str) -> Result<L::Module, BuildError> {
    let filepath = resolve(fullname, false, &self.search_path, &self.settings)?;
    self.load_module(&filepath, Some(fullname))
  }

  /// Resolve `fullname` on the search path and make sure its artifact is up
  /// to date, without loading it.
  pub fn build(&self, fullname: &str) -> Result<PathBuf, BuildError> {
    let filepath = resolve(fullname, false, &self.search_path, &self.settings)?;
    self.ensure_built(&filepath, Some(fullname))
  }

  /// Entry point for automatic imports.
  ///
  /// Only sources carrying the opt-in marker are considered. Returns `None`
  /// when no such source exists or when the module is already being handled
  /// further up this thread's stack.
  pub fn import_hook(&self, fullname: &str) -> Result<Option<L::Module>, BuildError> {
    let filepath = match resolve(fullname, true, &self.search_path, &self.settings) {
      Ok(path) => path,
      Err(ResolveError::NotFound { .. }) => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    let _guard = match self.enter(fullname) {
      Ok(guard) => guard,
      Err(BuildError::Reentrant(_)) => {
        debug!(module = %fullname, "import hook re-entered, deferring");
        return Ok(None);
      }
      Err(e) => return Err(e),
    };
    self.load_unguarded(&filepath, fullname).map(Some)
  }

  /// Load the module defined by `filepath`, building first if needed.
  ///
  /// Without `fullname` the module is named after the file stem.
  pub fn load_module(&self, filepath: &Path, fullname: Option<&str>) -> Result<L::Module, BuildError> {
    let fullname = module_name(filepath, fullname);
    let _guard = self.enter(&fullname)?;
    self.load_unguarded(filepath, &fullname)
  }

  /// Make sure the artifact of `filepath` is up to date and return its path.
  pub fn ensure_built(&self, filepath: &Path, fullname: Option<&str>) -> Result<PathBuf, BuildError> {
    let fullname = module_name(filepath, fullname);
    let _guard = self.enter(&fullname)?;

    let mut module = self.prepare(filepath, &fullname)?;
    enter_phase(&module, BuildPhase::NeedCheck);
    if self.is_build_needed(&module) {
      enter_phase(&module, BuildPhase::Stale);
      self.build_if_needed(&mut module, None)?;
    } else {
      enter_phase(&module, BuildPhase::Fresh);
      if !module.artifact_path.exists() {
        return Err(LoadError::NotFound(module.artifact_path).into());
      }
    }

    Ok(module.artifact_path)
  }

  /// Build the file at `filepath`, named after its stem.
  pub fn build_filepath(&self, filepath: &Path) -> Result<PathBuf, BuildError> {
    self.ensure_built(filepath, None)
  }

  /// Build every opted-in source below `root`, in path order. Returns the
  /// artifact paths.
  pub fn build_all(&self, root: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut artifacts = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
      let entry = entry?;
      if !entry.file_type().is_file() || !self.is_buildable(entry.path()) {
        continue;
      }
      info!(path = %entry.path().display(), "building");
      artifacts.push(self.build_filepath(entry.path())?);
    }

    Ok(artifacts)
  }

  fn is_buildable(&self, path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.starts_with(RENDERED_PREFIX) {
      return false;
    }
    let has_extension = self
      .settings
      .file_extensions
      .iter()
      .any(|ext| name.ends_with(ext.as_str()) && name.len() > ext.len());
    has_extension && has_opt_in_marker(path)
  }

  /// Fresh per-request state for `filepath`.
  pub fn prepare(&self, filepath: &Path, fullname: &str) -> Result<ModuleBuild, BuildError> {
    Ok(ModuleBuild::new(fullname, filepath, &self.settings.artifact_suffix)?)
  }

  pub fn is_build_needed(&self, module: &ModuleBuild) -> bool {
    if self.settings.force_rebuild {
      debug!(module = %module.fullname, "force rebuild requested");
      return true;
    }
    if self.settings.release_mode {
      debug!(module = %module.fullname, "release mode, skipping checksum check");
      return false;
    }
    !checksum::is_valid(module)
  }

  /// Load the artifact, or `None` when it can't be loaded.
  pub fn try_load(&self, module: &ModuleBuild) -> Option<L::Module> {
    enter_phase(module, BuildPhase::Loading);
    match self.loader.load(&module.fullname, &module.artifact_path) {
      Ok(loaded) => {
        enter_phase(module, BuildPhase::Loaded);
        Some(loaded)
      }
      Err(e) => {
        info!(module = %module.fullname, error = %e, "failed to load existing artifact, rebuilding");
        None
      }
    }
  }

  /// Render, compile and stamp `module` without any locking.
  pub fn template_and_build(&self, module: &mut ModuleBuild) -> Result<PathBuf, BuildError> {
    enter_phase(module, BuildPhase::Building);
    let started = Instant::now();

    let rendered = template::render(&module.filepath, &module.fullname, &self.settings)?;
    module.apply_rendered(rendered);

    let artifact = self.compiler.compile(&module.compile_request()).inspect_err(|_| {
      enter_phase(module, BuildPhase::Failed);
    })?;

    if let Some(rendered) = &module.rendered_source_path
      && let Err(e) = fs::remove_file(rendered)
    {
      debug!(path = %rendered.display(), error = %e, "failed to remove rendered source");
    }

    checksum::save(module)?;
    enter_phase(module, BuildPhase::Stamped);
    info!(
      module = %module.fullname,
      artifact = %artifact.display(),
      elapsed = %humantime::format_duration(Duration::from_millis(started.elapsed().as_millis() as u64)),
      "built"
    );

    Ok(artifact)
  }

  /// Build `module` unless a concurrent builder finishes it first.
  ///
  /// `stale` identifies an artifact that already failed to load; it only
  /// counts as complete once replaced.
  pub fn build_safely(&self, module: &mut ModuleBuild, stale: Option<ArtifactStamp>) -> Result<(), BuildError> {
    if self.settings.force_rebuild {
      return Err(BuildError::Config(
        "build_safely cannot be combined with force_rebuild".to_string(),
      ));
    }

    let lock_path = module.lock_path(&self.settings.lock_suffix);
    let started = Instant::now();

    while !self.build_completed(module, stale) && started.elapsed() < self.settings.lock_timeout {
      enter_phase(module, BuildPhase::Locking);
      match BuildLock::acquire(&lock_path, self.settings.lock_attempt_timeout, &module.fullname) {
        Ok(held) => {
          if !self.build_completed(module, stale) {
            self.template_and_build(module)?;
          }
          held.release();
          return Ok(());
        }
        Err(LockError::Timeout { .. }) => {
          let pid = lock::read_holder(&lock_path).map(|holder| holder.pid);
          debug!(module = %module.fullname, pid = ?pid, "another process is building, waiting");
          thread::sleep(self.settings.lock_retry_delay);
        }
        Err(e) => return Err(e.into()),
      }
    }

    if !self.build_completed(module, stale) {
      enter_phase(module, BuildPhase::Failed);
      return Err(BuildError::LockTimeout {
        module: module.fullname.clone(),
        pid: lock::read_holder(&lock_path).map(|holder| holder.pid),
        waited: started.elapsed(),
        lock_path,
      });
    }

    Ok(())
  }

  /// `force_rebuild` builds straight away, everything else goes through the
  /// lock.
  pub fn build_if_needed(&self, module: &mut ModuleBuild, stale: Option<ArtifactStamp>) -> Result<(), BuildError> {
    if self.settings.force_rebuild {
      self.template_and_build(module)?;
      Ok(())
    } else {
      self.build_safely(module, stale)
    }
  }

  fn build_completed(&self, module: &ModuleBuild, stale: Option<ArtifactStamp>) -> bool {
    if !module.artifact_path.exists() || !checksum::is_valid(module) {
      return false;
    }
    match stale {
      Some(stale) => ArtifactStamp::capture(&module.artifact_path) != Some(stale),
      None => true,
    }
  }

  fn load_unguarded(&self, filepath: &Path, fullname: &str) -> Result<L::Module, BuildError> {
    let mut module = self.prepare(filepath, fullname)?;
    enter_phase(&module, BuildPhase::NeedCheck);

    let mut stale = None;
    if !self.is_build_needed(&module) {
      enter_phase(&module, BuildPhase::Fresh);
      if self.settings.release_mode {
        enter_phase(&module, BuildPhase::Loading);
        let loaded = self
          .loader
          .load(&module.fullname, &module.artifact_path)
          .inspect_err(|_| enter_phase(&module, BuildPhase::Failed))?;
        enter_phase(&module, BuildPhase::Loaded);
        return Ok(loaded);
      }
      if let Some(loaded) = self.try_load(&module) {
        return Ok(loaded);
      }
      stale = ArtifactStamp::capture(&module.artifact_path);
    }

    enter_phase(&module, BuildPhase::Stale);
    self.build_if_needed(&mut module, stale)?;

    enter_phase(&module, BuildPhase::Loading);
    let loaded = self
      .loader
      .load(&module.fullname, &module.artifact_path)
      .inspect_err(|e| {
        warn!(module = %module.fullname, error = %e, "freshly built artifact failed to load");
        enter_phase(&module, BuildPhase::Failed);
      })?;
    enter_phase(&module, BuildPhase::Loaded);
    Ok(loaded)
  }

  fn enter(&self, fullname: &str) -> Result<InProgressGuard<'_>, BuildError> {
    let key = (thread::current().id(), fullname.to_string());
    let mut set = self.in_progress.lock().unwrap_or_else(|e| e.into_inner());
    if !set.insert(key.clone()) {
      return Err(BuildError::Reentrant(fullname.to_string()));
    }
    Ok(InProgressGuard {
      set: &self.in_progress,
      key,
    })
  }
}

fn module_name(filepath: &Path, fullname: Option<&str>) -> String {
  fullname
    .map(str::to_string)
    .unwrap_or_else(|| ModuleBuild::name_from_path(filepath))
}
