use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::build::CompileRequest;
use crate::template::{BuildConfig, RenderedSource};
use crate::util::paths::make_absolute;

/// Everything known about one module while it is being checked, built and
/// loaded. Created per request and discarded afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleBuild {
  /// Full dotted module name.
  pub fullname: String,
  /// Absolute path of the source file.
  pub filepath: PathBuf,
  /// Directory containing the source file.
  pub dir: PathBuf,
  /// File name of the source file.
  pub basename: String,
  /// Compiled artifact, next to the source.
  pub artifact_path: PathBuf,
  /// Rendered source, set once templating ran.
  pub rendered_source_path: Option<PathBuf>,
  pub config: BuildConfig,
  pub abs_include_dirs: Vec<PathBuf>,
  pub abs_library_dirs: Vec<PathBuf>,
  pub dependency_dirs: Vec<PathBuf>,
  pub extra_source_filepaths: Vec<PathBuf>,
}

impl ModuleBuild {
  /// Set up the build state for `filepath`. The artifact is named after the
  /// last segment of `fullname` plus `artifact_suffix`.
  pub fn new(fullname: &str, filepath: &Path, artifact_suffix: &str) -> io::Result<Self> {
    let filepath = make_absolute(&std::env::current_dir()?, filepath);
    let dir = filepath.parent().map(Path::to_path_buf).unwrap_or_default();
    let basename = filepath
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();

    let short_name = fullname.rsplit('.').next().unwrap_or(fullname);
    let artifact_path = dir.join(format!("{}{}", short_name, artifact_suffix));

    Ok(Self {
      fullname: fullname.to_string(),
      filepath,
      dir,
      basename,
      artifact_path,
      rendered_source_path: None,
      config: BuildConfig::default(),
      abs_include_dirs: Vec::new(),
      abs_library_dirs: Vec::new(),
      dependency_dirs: Vec::new(),
      extra_source_filepaths: Vec::new(),
    })
  }

  /// Module name derived from a file stem, for builds requested by path.
  pub fn name_from_path(filepath: &Path) -> String {
    filepath
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  }

  /// Take over the rendered source and its configuration, resolving every
  /// configured directory and extra source against the source's directory.
  pub fn apply_rendered(&mut self, rendered: RenderedSource) {
    let config = rendered.config;

    self.abs_include_dirs = config
      .include_dirs
      .iter()
      .map(|d| make_absolute(&self.dir, Path::new(d)))
      .chain(std::iter::once(self.dir.clone()))
      .collect();
    self.abs_library_dirs = config
      .library_dirs
      .iter()
      .map(|d| make_absolute(&self.dir, Path::new(d)))
      .collect();
    self.dependency_dirs = self
      .abs_include_dirs
      .iter()
      .cloned()
      .chain(std::iter::once(self.dir.clone()))
      .collect();
    self.extra_source_filepaths = config
      .sources
      .iter()
      .map(|s| make_absolute(&self.dir, Path::new(s)))
      .collect();

    self.rendered_source_path = Some(rendered.path);
    self.config = config;
  }

  pub fn lock_path(&self, lock_suffix: &str) -> PathBuf {
    let mut path = self.artifact_path.clone().into_os_string();
    path.push(lock_suffix);
    PathBuf::from(path)
  }

  /// The compile job for this module: extra sources first, then the
  /// rendered source.
  pub fn compile_request(&self) -> CompileRequest {
    let mut sources = self.extra_source_filepaths.clone();
    sources.push(
      self
        .rendered_source_path
        .clone()
        .unwrap_or_else(|| self.filepath.clone()),
    );

    CompileRequest {
      name: self.fullname.clone(),
      sources,
      include_dirs: self.abs_include_dirs.clone(),
      library_dirs: self.abs_library_dirs.clone(),
      libraries: self.config.libraries.clone(),
      compiler_flags: self.config.extra_compile_args.clone(),
      linker_flags: self.config.extra_link_args.clone(),
      output: self.artifact_path.clone(),
      parallel: self.config.parallel,
    }
  }
}

/// Identity of an artifact file at one point in time.
///
/// Lets a process that saw an artifact fail to load tell whether a peer has
/// since replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactStamp {
  len: u64,
  modified: Option<SystemTime>,
}

impl ArtifactStamp {
  pub fn capture(path: &Path) -> Option<Self> {
    let metadata = fs::metadata(path).ok()?;
    Some(Self {
      len: metadata.len(),
      modified: metadata.modified().ok(),
    })
  }
}
