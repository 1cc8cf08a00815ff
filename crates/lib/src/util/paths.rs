//! Path helpers shared by the resolver, the checksum oracle and the builder.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

/// Join `path` onto `base` unless it is already absolute, then normalize.
pub fn make_absolute(base: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    normalize(path)
  } else {
    normalize(&base.join(path))
  }
}

/// Resolve `.` and `..` lexically without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !normalized.pop() {
          normalized.push("..");
        }
      }
      other => normalized.push(other),
    }
  }
  normalized
}

/// Whether the first line of `path` contains `marker`.
///
/// The line is read as raw bytes so non-UTF-8 sources are still checked.
pub fn first_line_contains(path: &Path, marker: &str) -> io::Result<bool> {
  let mut reader = BufReader::new(fs::File::open(path)?);
  let mut line = Vec::new();
  reader.read_until(b'\n', &mut line)?;

  let marker = marker.as_bytes();
  if marker.is_empty() {
    return Ok(true);
  }
  Ok(line.windows(marker.len()).any(|window| window == marker))
}

/// Whether the final component of `pattern` uses `*` or `?` wildcards.
pub fn is_glob(pattern: &Path) -> bool {
  pattern
    .file_name()
    .map(|name| name.to_string_lossy().contains(['*', '?']))
    .unwrap_or(false)
}

/// Expand a pattern whose final component may contain `*` and `?`.
///
/// Only the file name is matched; the parent directory is taken literally.
/// Matches are returned sorted. A pattern without wildcards is returned as is,
/// whether or not it exists.
pub fn expand_glob(pattern: &Path) -> io::Result<Vec<PathBuf>> {
  if !is_glob(pattern) {
    return Ok(vec![pattern.to_path_buf()]);
  }

  let parent = pattern.parent().unwrap_or(Path::new("."));
  let name_pattern = pattern
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();

  let mut matches = Vec::new();
  for entry in fs::read_dir(parent)? {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let name = entry.file_name();
    if wildcard_match(&name_pattern, &name.to_string_lossy()) {
      matches.push(entry.path());
    }
  }
  matches.sort();
  Ok(matches)
}

/// Match `name` against a pattern where `*` is any run and `?` any one char.
fn wildcard_match(pattern: &str, name: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let name: Vec<char> = name.chars().collect();

  let (mut p, mut n) = (0, 0);
  let mut backtrack: Option<(usize, usize)> = None;

  while n < name.len() {
    if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
      p += 1;
      n += 1;
    } else if p < pattern.len() && pattern[p] == '*' {
      backtrack = Some((p, n));
      p += 1;
    } else if let Some((star_p, star_n)) = backtrack {
      p = star_p + 1;
      n = star_n + 1;
      backtrack = Some((star_p, star_n + 1));
    } else {
      return false;
    }
  }

  pattern[p..].iter().all(|&c| c == '*')
}
