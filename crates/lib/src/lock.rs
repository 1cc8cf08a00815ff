//! Cross-process build locks.
//!
//! A lock is an OS-level exclusive lock on `<artifact><lock_suffix>`. The OS
//! drops the lock when its holder exits, so a lock file left behind by a
//! crashed process never blocks anyone. The file itself only carries
//! diagnostics: who holds it and since when.
//!
//! On Unix the holder removes the file before unlocking. Windows keeps the
//! file in place: a deleted file that another handle still has open lingers
//! in a delete-pending state in which it can be neither opened nor replaced.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::LOCK_POLL_INTERVAL;

const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub module: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("timed out after {} waiting for lock {}", humantime::format_duration(*waited), path.display())]
  Timeout { path: PathBuf, waited: Duration },

  #[error("failed to open lock file {}: {source}", path.display())]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {}: {source}", path.display())]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata to {}: {source}", path.display())]
  WriteMetadata {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// An acquired build lock. Released, and its file removed, on drop.
#[derive(Debug)]
pub struct BuildLock {
  file: Option<File>,
  path: PathBuf,
}

impl BuildLock {
  /// Acquire the lock at `path`, polling until `timeout` has elapsed.
  ///
  /// A zero timeout makes exactly one attempt.
  pub fn acquire(path: &Path, timeout: Duration, module: &str) -> Result<Self, LockError> {
    let start = Instant::now();

    loop {
      let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Open {
          path: path.to_path_buf(),
          source,
        })?;

      match try_lock(&file) {
        Ok(()) => {
          if !still_at_path(&file, path) {
            debug!(path = %path.display(), "lock file was replaced while locking, retrying");
            continue;
          }

          let lock = BuildLock {
            file: Some(file),
            path: path.to_path_buf(),
          };
          lock.write_metadata(module)?;
          debug!(path = %path.display(), module = %module, "acquired build lock");
          return Ok(lock);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(source) => {
          return Err(LockError::Lock {
            path: path.to_path_buf(),
            source,
          });
        }
      }

      let waited = start.elapsed();
      if waited >= timeout {
        return Err(LockError::Timeout {
          path: path.to_path_buf(),
          waited,
        });
      }
      std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.path
  }

  /// Read the metadata back through the held handle.
  ///
  /// Opening the path again would fail on Windows, where the lock is
  /// mandatory.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let Some(mut file) = self.file.as_ref() else {
      return Err(io::Error::other("lock already released"));
    };
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  /// Release the lock now instead of at end of scope.
  pub fn release(mut self) {
    self.unlock();
  }

  fn write_metadata(&self, module: &str) -> Result<(), LockError> {
    let metadata = LockMetadata {
      version: METADATA_VERSION,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      module: module.to_string(),
    };

    let write_err = |source| LockError::WriteMetadata {
      path: self.path.clone(),
      source,
    };

    let Some(file) = self.file.as_ref() else {
      return Ok(());
    };
    file.set_len(0).map_err(write_err)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| write_err(io::Error::other(e)))?;
    writer.flush().map_err(write_err)?;

    Ok(())
  }

  /// Unlock by closing. On Unix the file is removed first, while still
  /// held; a waiter that locks the removed inode sees it no longer matches
  /// the path.
  fn unlock(&mut self) {
    if let Some(file) = self.file.take() {
      if cfg!(unix) {
        match fs::remove_file(&self.path) {
          Ok(()) => {}
          Err(e) if e.kind() == io::ErrorKind::NotFound => {}
          Err(e) => debug!(path = %self.path.display(), error = %e, "failed to remove lock file"),
        }
      }
      drop(file);
      debug!(path = %self.path.display(), "released build lock");
    }
  }
}

impl Drop for BuildLock {
  fn drop(&mut self) {
    self.unlock();
  }
}

/// Metadata of whoever currently holds the lock at `path`, if readable.
pub fn read_holder(path: &Path) -> Option<LockMetadata> {
  let contents = fs::read_to_string(path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}

/// Whether `file` is still the file that `path` names.
#[cfg(unix)]
fn still_at_path(file: &File, path: &Path) -> bool {
  use std::os::unix::fs::MetadataExt;

  match (file.metadata(), fs::metadata(path)) {
    (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
    _ => false,
  }
}

/// Lock files are never removed on Windows, so the path always names the
/// file every contender opened.
#[cfg(windows)]
fn still_at_path(_file: &File, _path: &Path) -> bool {
  true
}
