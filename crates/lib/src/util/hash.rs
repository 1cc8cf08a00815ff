//! Content hashing for staleness checks.
//!
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `hash_files()`: digest of the concatenated bytes of several files

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A lowercase hexadecimal SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to read {}: {source}", path.display())]
pub struct HashError {
  pub path: PathBuf,
  #[source]
  pub source: std::io::Error,
}

/// Hash the concatenation of the given files' contents, in order.
///
/// Files are streamed in binary mode, so the digest is identical to hashing
/// the bytes of all files glued together and independent of line endings.
pub fn hash_files<P: AsRef<Path>>(paths: &[P]) -> Result<ContentHash, HashError> {
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  for path in paths {
    let path = path.as_ref();
    let read_err = |source| HashError {
      path: path.to_path_buf(),
      source,
    };

    let mut file = fs::File::open(path).map_err(read_err)?;
    loop {
      let bytes_read = file.read(&mut buffer).map_err(read_err)?;
      if bytes_read == 0 {
        break;
      }
      hasher.update(&buffer[..bytes_read]);
    }
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}
