//! Test doubles and helpers for extbuild-lib unit tests.
//!
//! `RecordingCompiler` stands in for a real C/C++ toolchain: its "artifact" is
//! a magic prefix followed by the bytes of every source it was given, which
//! `FakeLoader` accepts. That is enough to observe what was compiled, how
//! often, and whether a later load sees a complete artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::build::{CompileError, CompileRequest, Compiler, LoadError, Loader};

pub const FAKE_ARTIFACT_MAGIC: &[u8] = b"FAKEDYLIB\n";

/// A compiler that concatenates its sources behind a magic prefix.
#[derive(Debug, Clone, Default)]
pub struct RecordingCompiler {
  calls: Arc<AtomicUsize>,
  fail: Arc<AtomicBool>,
  delay: Duration,
}

impl RecordingCompiler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep this long inside every compile, to widen race windows.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn set_failing(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }
}

impl Compiler for RecordingCompiler {
  fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    if self.fail.load(Ordering::SeqCst) {
      return Err(CompileError::Failed {
        name: request.name.clone(),
        code: Some(1),
        stderr: "error: this compiler was told to fail".to_string(),
      });
    }

    let mut artifact = FAKE_ARTIFACT_MAGIC.to_vec();
    for source in &request.sources {
      artifact.extend(fs::read(source)?);
    }

    let staged = request.output.with_extension("staged");
    fs::write(&staged, artifact)?;
    fs::rename(&staged, &request.output)?;
    Ok(request.output.clone())
  }
}

/// A module "loaded" by [`FakeLoader`]: the artifact's bytes after the magic
/// prefix, checksum trailer included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeModule {
  pub name: String,
  pub body: Vec<u8>,
}

/// Accepts artifacts written by [`RecordingCompiler`].
#[derive(Debug, Clone, Default)]
pub struct FakeLoader {
  loads: Arc<AtomicUsize>,
}

impl FakeLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl Loader for FakeLoader {
  type Module = FakeModule;

  fn load(&self, fullname: &str, artifact: &Path) -> Result<FakeModule, LoadError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    let bytes = fs::read(artifact).map_err(|_| LoadError::NotFound(artifact.to_path_buf()))?;
    let Some(body) = bytes.strip_prefix(FAKE_ARTIFACT_MAGIC) else {
      return Err(LoadError::Open {
        path: artifact.to_path_buf(),
        message: "not a fake library".to_string(),
      });
    };
    Ok(FakeModule {
      name: fullname.to_string(),
      body: body.to_vec(),
    })
  }
}

/// A shell script standing in for `c++`: logs its arguments, one invocation
/// per line, and creates whatever `-o` names. Returns the script and log paths.
#[cfg(unix)]
pub fn fake_cc_script(dir: &Path) -> (PathBuf, PathBuf) {
  use std::os::unix::fs::PermissionsExt;

  let script = dir.join("fake-cc");
  let log = dir.join("fake-cc.log");
  let body = format!(
    r#"#!/bin/sh
echo "$*" >> "{log}"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
[ -n "$out" ] && printf 'FAKEDYLIB\n' > "$out"
exit 0
"#,
    log = log.display()
  );
  fs::write(&script, body).unwrap();
  fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
  (script, log)
}

/// Run `f` with the process working directory set to `dir`.
///
/// Tests using this must be `#[serial]`.
pub fn with_current_dir<F: FnOnce()>(dir: &Path, f: F) {
  let previous = std::env::current_dir().unwrap();
  std::env::set_current_dir(dir).unwrap();
  let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
  std::env::set_current_dir(previous).unwrap();
  if let Err(panic) = result {
    std::panic::resume_unwind(panic);
  }
}
