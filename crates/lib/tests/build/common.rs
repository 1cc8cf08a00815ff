//! Shared helpers for extbuild-lib integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use extbuild_lib::build::{CompileError, LoadError};
use extbuild_lib::{CompileRequest, Compiler, Loader, Orchestrator, SearchPath, Settings};
use tempfile::TempDir;

pub const MAGIC: &[u8] = b"TESTLIB\n";

pub const SOURCE: &str = "// extbuild\nint shared() { return 7; }\n";

/// Writes `MAGIC` plus the sources, after an optional pause.
#[derive(Debug, Clone, Default)]
pub struct SlowCompiler {
  pub calls: Arc<AtomicUsize>,
  pub delay: Duration,
}

impl SlowCompiler {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Compiler for SlowCompiler {
  fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    std::thread::sleep(self.delay);

    let mut bytes = MAGIC.to_vec();
    for source in &request.sources {
      bytes.extend(fs::read(source)?);
    }
    let staged = request.output.with_extension("tmp");
    fs::write(&staged, bytes)?;
    fs::rename(&staged, &request.output)?;
    Ok(request.output.clone())
  }
}

/// Returns the artifact bytes, refusing anything without `MAGIC`.
#[derive(Debug, Clone, Default)]
pub struct BytesLoader;

impl Loader for BytesLoader {
  type Module = Vec<u8>;

  fn load(&self, _fullname: &str, artifact: &Path) -> Result<Vec<u8>, LoadError> {
    let bytes = fs::read(artifact).map_err(|_| LoadError::NotFound(artifact.to_path_buf()))?;
    if !bytes.starts_with(MAGIC) {
      return Err(LoadError::Open {
        path: artifact.to_path_buf(),
        message: "missing magic".to_string(),
      });
    }
    Ok(bytes)
  }
}

/// Settings suited to tests: fixed artifact suffix, fast lock polling.
pub fn test_settings() -> Settings {
  Settings::default()
    .with_artifact_suffix(".so")
    .with_lock_timeout(Duration::from_secs(60))
    .with_lock_polling(Duration::from_millis(50), Duration::from_millis(10))
}

pub fn orchestrator<C: Compiler, L: Loader>(root: &Path, compiler: C, loader: L) -> Orchestrator<C, L> {
  Orchestrator::new(test_settings(), SearchPath::new([root]), compiler, loader)
}

pub fn write_file(temp: &TempDir, relative: &str, contents: &str) -> PathBuf {
  let path = temp.path().join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, contents).unwrap();
  path
}

/// A shell script standing in for `c++`: logs each invocation and creates
/// whatever `-o` names, prefixed with `MAGIC`.
#[cfg(unix)]
pub fn fake_toolchain(dir: &Path) -> (PathBuf, PathBuf) {
  use std::os::unix::fs::PermissionsExt;

  let script = dir.join("fake-cc");
  let log = dir.join("fake-cc.log");
  fs::write(
    &script,
    format!(
      "#!/bin/sh\necho \"$*\" >> \"{}\"\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n  shift\ndone\n[ -n \"$out\" ] && printf 'TESTLIB\\n' > \"$out\"\nexit 0\n",
      log.display()
    ),
  )
  .unwrap();
  fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
  (script, log)
}
