//! Build configuration extracted from a source template.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Build parameters a source file declares for itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Extra source files compiled alongside the module.
  pub sources: Vec<String>,
  pub include_dirs: Vec<String>,
  pub library_dirs: Vec<String>,
  /// Libraries to link. No duplicates; first occurrence order is kept.
  pub libraries: Vec<String>,
  pub extra_compile_args: Vec<String>,
  pub extra_link_args: Vec<String>,
  /// Files (or `*`/`?` patterns) whose content the artifact depends on.
  pub dependencies: Vec<String>,
  /// Compile sources concurrently.
  pub parallel: bool,
}

/// A configuration key. Legacy names parse to their canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
  Sources,
  IncludeDirs,
  LibraryDirs,
  Libraries,
  ExtraCompileArgs,
  ExtraLinkArgs,
  Dependencies,
  Parallel,
}

impl ConfigKey {
  pub const ALL: [ConfigKey; 8] = [
    ConfigKey::Sources,
    ConfigKey::IncludeDirs,
    ConfigKey::LibraryDirs,
    ConfigKey::Libraries,
    ConfigKey::ExtraCompileArgs,
    ConfigKey::ExtraLinkArgs,
    ConfigKey::Dependencies,
    ConfigKey::Parallel,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ConfigKey::Sources => "sources",
      ConfigKey::IncludeDirs => "include_dirs",
      ConfigKey::LibraryDirs => "library_dirs",
      ConfigKey::Libraries => "libraries",
      ConfigKey::ExtraCompileArgs => "extra_compile_args",
      ConfigKey::ExtraLinkArgs => "extra_link_args",
      ConfigKey::Dependencies => "dependencies",
      ConfigKey::Parallel => "parallel",
    }
  }

  pub fn is_flag(self) -> bool {
    matches!(self, ConfigKey::Parallel)
  }
}

impl FromStr for ConfigKey {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "compiler_args" => Ok(ConfigKey::ExtraCompileArgs),
      "linker_args" => Ok(ConfigKey::ExtraLinkArgs),
      _ => ConfigKey::ALL
        .into_iter()
        .find(|key| key.as_str() == s)
        .ok_or_else(|| ConfigError::UnknownKey(s.to_string())),
    }
  }
}

/// Canonical spelling of `key`; unknown keys are returned unchanged.
pub fn canonical_key(key: &str) -> &str {
  key.parse::<ConfigKey>().map(ConfigKey::as_str).unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
  List(Vec<String>),
  Flag(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("unknown build config key '{0}'")]
  UnknownKey(String),

  #[error("build config key '{key}' expects {expected}")]
  TypeMismatch { key: &'static str, expected: &'static str },
}

impl BuildConfig {
  /// Read a value by canonical or legacy key name.
  pub fn get(&self, key: &str) -> Result<ConfigValue, ConfigError> {
    let key: ConfigKey = key.parse()?;
    Ok(match key {
      ConfigKey::Parallel => ConfigValue::Flag(self.parallel),
      list => ConfigValue::List(self.list(list).map(<[String]>::to_vec).unwrap_or_default()),
    })
  }

  /// Write a value by canonical or legacy key name.
  pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), ConfigError> {
    let key: ConfigKey = key.parse()?;
    match (key, value) {
      (ConfigKey::Parallel, ConfigValue::Flag(flag)) => self.parallel = flag,
      (ConfigKey::Parallel, ConfigValue::List(_)) => {
        return Err(ConfigError::TypeMismatch {
          key: key.as_str(),
          expected: "a boolean",
        });
      }
      (_, ConfigValue::Flag(_)) => {
        return Err(ConfigError::TypeMismatch {
          key: key.as_str(),
          expected: "a list of strings",
        });
      }
      (ConfigKey::Libraries, ConfigValue::List(values)) => self.libraries = dedup_keep_order(values),
      (list, ConfigValue::List(values)) => {
        if let Some(slot) = self.list_mut(list) {
          *slot = values;
        }
      }
    }
    Ok(())
  }

  fn list(&self, key: ConfigKey) -> Option<&[String]> {
    match key {
      ConfigKey::Sources => Some(&self.sources),
      ConfigKey::IncludeDirs => Some(&self.include_dirs),
      ConfigKey::LibraryDirs => Some(&self.library_dirs),
      ConfigKey::Libraries => Some(&self.libraries),
      ConfigKey::ExtraCompileArgs => Some(&self.extra_compile_args),
      ConfigKey::ExtraLinkArgs => Some(&self.extra_link_args),
      ConfigKey::Dependencies => Some(&self.dependencies),
      ConfigKey::Parallel => None,
    }
  }

  fn list_mut(&mut self, key: ConfigKey) -> Option<&mut Vec<String>> {
    match key {
      ConfigKey::Sources => Some(&mut self.sources),
      ConfigKey::IncludeDirs => Some(&mut self.include_dirs),
      ConfigKey::LibraryDirs => Some(&mut self.library_dirs),
      ConfigKey::Libraries => Some(&mut self.libraries),
      ConfigKey::ExtraCompileArgs => Some(&mut self.extra_compile_args),
      ConfigKey::ExtraLinkArgs => Some(&mut self.extra_link_args),
      ConfigKey::Dependencies => Some(&mut self.dependencies),
      ConfigKey::Parallel => None,
    }
  }
}

fn dedup_keep_order(values: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}
