//! Dependency checksums.
//!
//! After a successful build the artifact gets a trailer appended:
//!
//! ```text
//! <artifact bytes> <JSON payload> <payload length: u64 LE> <tag: b"EXTBUILD">
//! ```
//!
//! The payload lists every file that went into the build, in order, and the
//! SHA-256 of their concatenated contents. An artifact is up to date when
//! hashing the listed files again yields the recorded digest. The trailer is
//! read back from the end of the file, so the artifact itself stays loadable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::build::ModuleBuild;
use crate::consts::{TRAILER_FOOTER_LEN, TRAILER_TAG};
use crate::util::hash::{ContentHash, HashError, hash_files};
use crate::util::paths::{expand_glob, is_glob, make_absolute};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumTrailer {
  pub deps: Vec<PathBuf>,
  pub hash: ContentHash,
}

/// Why a trailer could not be read.
#[derive(Debug, Error)]
pub enum TrailerError {
  #[error("artifact {} does not exist", .0.display())]
  Missing(PathBuf),

  #[error("{} is too short ({len} bytes) to carry a checksum trailer", path.display())]
  TooShort { path: PathBuf, len: u64 },

  #[error("{} has no checksum trailer", .0.display())]
  TagMismatch(PathBuf),

  #[error("{} declares a {payload_len}-byte trailer but only has {available} bytes", path.display())]
  BadLength {
    path: PathBuf,
    payload_len: u64,
    available: u64,
  },

  #[error("failed to read trailer of {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("unparsable checksum trailer in {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Why an artifact is out of date.
#[derive(Debug, Error)]
pub enum Staleness {
  #[error(transparent)]
  Trailer(#[from] TrailerError),

  #[error("dependency unreadable: {0}")]
  Dependency(#[from] HashError),

  #[error("checksum mismatch: recorded {recorded}, current {current}")]
  Mismatch { recorded: ContentHash, current: ContentHash },
}

#[derive(Debug, Error)]
pub enum ChecksumError {
  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("failed to expand dependency pattern {}: {source}", pattern.display())]
  Glob {
    pattern: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode checksum trailer: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("failed to append checksum trailer to {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Files the artifact of `module` depends on, in hashing order: declared
/// dependencies (patterns expanded, sorted), then extra sources, then the
/// module source itself.
pub fn dependency_list(module: &ModuleBuild) -> Result<Vec<PathBuf>, ChecksumError> {
  let mut deps = Vec::new();

  for dep in &module.config.dependencies {
    let path = make_absolute(&module.dir, Path::new(dep));
    if is_glob(&path) {
      let matches = expand_glob(&path).map_err(|source| ChecksumError::Glob {
        pattern: path.clone(),
        source,
      })?;
      deps.extend(matches);
    } else {
      deps.push(path);
    }
  }
  deps.extend(module.extra_source_filepaths.iter().cloned());
  deps.push(module.filepath.clone());

  Ok(deps)
}

/// Hash the dependencies of `module` and append the trailer to its artifact.
pub fn save(module: &ModuleBuild) -> Result<ChecksumTrailer, ChecksumError> {
  let deps = dependency_list(module)?;
  let hash = hash_files(&deps)?;
  let trailer = ChecksumTrailer { deps, hash };

  let payload = serde_json::to_vec(&trailer)?;
  let mut bytes = Vec::with_capacity(payload.len() + TRAILER_FOOTER_LEN);
  bytes.extend_from_slice(&payload);
  bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
  bytes.extend_from_slice(TRAILER_TAG);

  let path = &module.artifact_path;
  let write_err = |source| ChecksumError::Write {
    path: path.clone(),
    source,
  };
  let mut file = OpenOptions::new().append(true).open(path).map_err(write_err)?;
  file.write_all(&bytes).map_err(write_err)?;
  file.sync_all().map_err(write_err)?;

  debug!(module = %module.fullname, hash = %trailer.hash, deps = trailer.deps.len(), "saved checksum trailer");
  Ok(trailer)
}

/// Read the trailer at the end of `artifact`.
pub fn read_trailer(artifact: &Path) -> Result<ChecksumTrailer, TrailerError> {
  let io_err = |source| TrailerError::Io {
    path: artifact.to_path_buf(),
    source,
  };

  let mut file = File::open(artifact).map_err(|e| match e.kind() {
    io::ErrorKind::NotFound => TrailerError::Missing(artifact.to_path_buf()),
    _ => io_err(e),
  })?;

  let len = file.metadata().map_err(io_err)?.len();
  let footer_len = TRAILER_FOOTER_LEN as u64;
  if len < footer_len {
    return Err(TrailerError::TooShort {
      path: artifact.to_path_buf(),
      len,
    });
  }

  file.seek(SeekFrom::Start(len - footer_len)).map_err(io_err)?;
  let mut footer = [0u8; TRAILER_FOOTER_LEN];
  file.read_exact(&mut footer).map_err(io_err)?;

  let (len_bytes, tag) = footer.split_at(8);
  if tag != TRAILER_TAG {
    return Err(TrailerError::TagMismatch(artifact.to_path_buf()));
  }

  let mut payload_len = [0u8; 8];
  payload_len.copy_from_slice(len_bytes);
  let payload_len = u64::from_le_bytes(payload_len);
  let available = len - footer_len;
  if payload_len > available {
    return Err(TrailerError::BadLength {
      path: artifact.to_path_buf(),
      payload_len,
      available,
    });
  }

  file.seek(SeekFrom::Start(available - payload_len)).map_err(io_err)?;
  let mut payload = Vec::new();
  file.take(payload_len).read_to_end(&mut payload).map_err(io_err)?;

  serde_json::from_slice(&payload).map_err(|source| TrailerError::Parse {
    path: artifact.to_path_buf(),
    source,
  })
}

/// Check `artifact` against the current contents of its recorded dependencies.
pub fn verify(artifact: &Path) -> Result<ChecksumTrailer, Staleness> {
  let trailer = read_trailer(artifact)?;
  let current = hash_files(&trailer.deps)?;
  if current != trailer.hash {
    return Err(Staleness::Mismatch {
      recorded: trailer.hash,
      current,
    });
  }
  Ok(trailer)
}

/// Whether the artifact of `module` is up to date. Never fails: anything
/// that prevents a positive answer is logged and counts as stale.
pub fn is_valid(module: &ModuleBuild) -> bool {
  match verify(&module.artifact_path) {
    Ok(_) => true,
    Err(reason) => {
      info!(module = %module.fullname, reason = %reason, "artifact is stale");
      false
    }
  }
}
