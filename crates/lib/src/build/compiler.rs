//! The compile step.
//!
//! The orchestrator only needs something that turns a [`CompileRequest`] into
//! a loadable artifact. [`CommandCompiler`] does that by driving a C/C++
//! compiler driver (`c++`, `gcc`, `clang`...) with GCC-style arguments.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::ENV_COMPILER;

/// One compile-and-link job producing a shared library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
  pub name: String,
  pub sources: Vec<PathBuf>,
  pub include_dirs: Vec<PathBuf>,
  pub library_dirs: Vec<PathBuf>,
  pub libraries: Vec<String>,
  pub compiler_flags: Vec<String>,
  pub linker_flags: Vec<String>,
  /// Final location of the artifact. Replaced wholesale on success.
  pub output: PathBuf,
  /// Compile sources to objects concurrently before linking.
  pub parallel: bool,
}

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("failed to run compiler '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("compiling {name} failed with exit code {code:?}:\n{stderr}")]
  Failed {
    name: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("io error while compiling: {0}")]
  Io(#[from] io::Error),
}

pub trait Compiler {
  /// Compile and link `request`, returning the path of the artifact.
  fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError>;
}

impl<T: Compiler + ?Sized> Compiler for &T {
  fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
    (**self).compile(request)
  }
}

/// Drives an external compiler driver.
///
/// Objects and the linked library are staged in a temporary directory next to
/// the output and the library is renamed into place, so a reader never sees
/// a half-written artifact and an already-loaded copy keeps its inode.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
  program: String,
}

impl Default for CommandCompiler {
  fn default() -> Self {
    Self::new("c++")
  }
}

impl CommandCompiler {
  pub fn new(program: &str) -> Self {
    Self {
      program: program.to_string(),
    }
  }

  /// `EXTBUILD_CC`, then `CXX`, then `c++`.
  pub fn from_env() -> Self {
    [ENV_COMPILER, "CXX"]
      .iter()
      .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
      .map(|program| Self::new(&program))
      .unwrap_or_default()
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  fn compile_object(&self, request: &CompileRequest, source: &Path, object: &Path) -> Result<(), CompileError> {
    let mut args = vec!["-fPIC".to_string()];
    args.extend(request.compiler_flags.iter().cloned());
    args.extend(include_args(&request.include_dirs));
    args.push("-c".to_string());
    args.push(source.display().to_string());
    args.push("-o".to_string());
    args.push(object.display().to_string());

    self.run(&request.name, &args)
  }

  fn link(&self, request: &CompileRequest, inputs: &[PathBuf], staged: &Path) -> Result<(), CompileError> {
    let mut args = vec!["-shared".to_string()];
    args.extend(inputs.iter().map(|p| p.display().to_string()));
    args.push("-o".to_string());
    args.push(staged.display().to_string());
    args.extend(link_args(request));

    self.run(&request.name, &args)
  }

  /// Compile and link in a single driver invocation.
  fn compile_and_link(&self, request: &CompileRequest, staged: &Path) -> Result<(), CompileError> {
    let mut args = vec!["-shared".to_string(), "-fPIC".to_string()];
    args.extend(request.compiler_flags.iter().cloned());
    args.extend(include_args(&request.include_dirs));
    args.extend(request.sources.iter().map(|p| p.display().to_string()));
    args.push("-o".to_string());
    args.push(staged.display().to_string());
    args.extend(link_args(request));

    self.run(&request.name, &args)
  }

  fn run(&self, name: &str, args: &[String]) -> Result<(), CompileError> {
    debug!(program = %self.program, args = ?args, "invoking compiler");

    let output = Command::new(&self.program)
      .args(args)
      .output()
      .map_err(|source| CompileError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "compiler stdout");
    }
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "compiler stderr");
    }

    if !output.status.success() {
      return Err(CompileError::Failed {
        name: name.to_string(),
        code: output.status.code(),
        stderr: stderr.into_owned(),
      });
    }

    Ok(())
  }
}

impl Compiler for CommandCompiler {
  fn compile(&self, request: &CompileRequest) -> Result<PathBuf, CompileError> {
    let out_dir = request.output.parent().unwrap_or(Path::new("."));
    let build_dir = tempfile::Builder::new().prefix(".extbuild-").tempdir_in(out_dir)?;
    let file_name = request
      .output
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_else(|| "artifact".into());
    let staged = build_dir.path().join(file_name);

    info!(module = %request.name, sources = request.sources.len(), parallel = request.parallel, "compiling");

    if request.parallel && request.sources.len() > 1 {
      let objects = request
        .sources
        .par_iter()
        .enumerate()
        .map(|(i, source)| {
          let object = build_dir.path().join(format!("{}.o", i));
          self.compile_object(request, source, &object).map(|()| object)
        })
        .collect::<Result<Vec<_>, _>>()?;
      self.link(request, &objects, &staged)?;
    } else {
      self.compile_and_link(request, &staged)?;
    }

    fs::rename(&staged, &request.output)?;
    Ok(request.output.clone())
  }
}

fn include_args(dirs: &[PathBuf]) -> impl Iterator<Item = String> + '_ {
  dirs.iter().map(|d| format!("-I{}", d.display()))
}

fn link_args(request: &CompileRequest) -> Vec<String> {
  let mut args: Vec<String> = request
    .library_dirs
    .iter()
    .map(|d| format!("-L{}", d.display()))
    .collect();
  args.extend(request.libraries.iter().map(|l| format!("-l{}", l)));
  args.extend(request.linker_flags.iter().cloned());
  args
}
