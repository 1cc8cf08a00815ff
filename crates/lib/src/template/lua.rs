//! Sandboxed Lua runtime for template code.
//!
//! Template code sees a restricted standard library (`table`, `string`,
//! `math`, `utf8` plus the safe base functions) and these globals:
//!
//! - `cfg`: the build configuration, readable and writable by any canonical or
//!   legacy key name
//! - `module`: `name`, `file` and `dir` of the module being rendered
//! - `setup_binding(cfg)` / `setup_pybind11(cfg)`: add the binding include
//!   directories and the compile flags binding code needs
//! - `print(...)`: routed to the debug log

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, warn};

use super::config::{BuildConfig, ConfigKey, ConfigValue, canonical_key};
use crate::settings::Settings;

/// Compile flags prepended by `setup_binding`.
const BINDING_COMPILE_ARGS: &[&str] = &["-std=c++11", "-fvisibility=hidden"];

/// Registry slot holding the table behind `cfg`.
const STORAGE_KEY: &str = "extbuild.cfg";

/// Globals of the base library that reach outside the sandbox.
const REMOVED_GLOBALS: &[&str] = &["load", "loadfile", "dofile", "require", "collectgarbage"];

/// Output of running a template chunk.
#[derive(Debug)]
pub(super) struct Evaluated {
  pub text: Vec<u8>,
  pub config: BuildConfig,
}

pub(super) fn create_sandbox() -> LuaResult<Lua> {
  let lua = Lua::new_with(
    LuaStdLib::TABLE | LuaStdLib::STRING | LuaStdLib::MATH | LuaStdLib::UTF8,
    LuaOptions::default(),
  )?;

  let globals = lua.globals();
  for name in REMOVED_GLOBALS {
    globals.set(*name, LuaValue::Nil)?;
  }

  globals.set(
    "print",
    lua.create_function(|lua, args: LuaMultiValue| {
      let tostring: LuaFunction = lua.globals().get("tostring")?;
      let parts = args
        .into_iter()
        .map(|value| tostring.call::<String>(value))
        .collect::<LuaResult<Vec<_>>>()?;
      debug!(target: "extbuild::template", "{}", parts.join("\t"));
      Ok(())
    })?,
  )?;

  Ok(lua)
}

/// Run `chunk` for the module `fullname` defined in `source`.
pub(super) fn evaluate(chunk: &[u8], source: &Path, fullname: &str, settings: &Settings) -> LuaResult<Evaluated> {
  let lua = create_sandbox()?;
  let globals = lua.globals();

  let output = Rc::new(RefCell::new(Vec::new()));
  let sink = Rc::clone(&output);
  globals.set(
    "__emit",
    lua.create_function(move |_, text: LuaString| {
      sink.borrow_mut().extend_from_slice(&text.as_bytes());
      Ok(())
    })?,
  )?;

  let storage = create_storage(&lua)?;
  lua.set_named_registry_value(STORAGE_KEY, &storage)?;
  globals.set("cfg", create_cfg_proxy(&lua)?)?;
  globals.set("module", create_module_table(&lua, source, fullname)?)?;

  let setup_binding = create_setup_binding(&lua, settings)?;
  globals.set("setup_binding", setup_binding.clone())?;
  globals.set("setup_pybind11", setup_binding)?;

  lua
    .load(chunk)
    .set_name(format!("@{}", source.display()))
    .exec()?;

  let config = storage_to_config(&storage)?;
  let text = std::mem::take(&mut *output.borrow_mut());
  Ok(Evaluated { text, config })
}

/// The raw table behind `cfg`, keyed by canonical names only.
fn create_storage(lua: &Lua) -> LuaResult<LuaTable> {
  let storage = lua.create_table()?;
  for key in ConfigKey::ALL {
    if key.is_flag() {
      storage.raw_set(key.as_str(), false)?;
    } else {
      storage.raw_set(key.as_str(), lua.create_table()?)?;
    }
  }
  Ok(storage)
}

fn storage(lua: &Lua) -> LuaResult<LuaTable> {
  lua.named_registry_value(STORAGE_KEY)
}

/// An empty table whose metatable forwards every access to the storage
/// table after mapping legacy key names onto canonical ones.
fn create_cfg_proxy(lua: &Lua) -> LuaResult<LuaTable> {
  let proxy = lua.create_table()?;
  let mt = lua.create_table()?;

  mt.set(
    "__index",
    lua.create_function(|lua, (_proxy, key): (LuaTable, String)| {
      storage(lua)?.raw_get::<LuaValue>(canonical_key(&key))
    })?,
  )?;
  mt.set(
    "__newindex",
    lua.create_function(|lua, (_proxy, key, value): (LuaTable, String, LuaValue)| {
      storage(lua)?.raw_set(canonical_key(&key), value)
    })?,
  )?;
  mt.set(
    "__pairs",
    lua.create_function(|lua, _proxy: LuaTable| {
      let next: LuaFunction = lua.globals().get("next")?;
      Ok((next, storage(lua)?, LuaValue::Nil))
    })?,
  )?;

  proxy.set_metatable(Some(mt))?;
  Ok(proxy)
}

fn create_module_table(lua: &Lua, source: &Path, fullname: &str) -> LuaResult<LuaTable> {
  let module = lua.create_table()?;
  module.set("name", fullname)?;
  module.set("file", source.to_string_lossy().to_string())?;
  module.set(
    "dir",
    source
      .parent()
      .unwrap_or(Path::new(""))
      .to_string_lossy()
      .to_string(),
  )?;
  Ok(module)
}

fn create_setup_binding(lua: &Lua, settings: &Settings) -> LuaResult<LuaFunction> {
  let include_dirs: Vec<String> = settings
    .binding_include_dirs
    .iter()
    .map(|d| d.to_string_lossy().to_string())
    .collect();

  lua.create_function(move |lua, cfg: LuaTable| {
    let includes: LuaTable = cfg.get(ConfigKey::IncludeDirs.as_str())?;
    for dir in &include_dirs {
      includes.push(dir.as_str())?;
    }

    let existing: LuaTable = cfg.get(ConfigKey::ExtraCompileArgs.as_str())?;
    let args = lua.create_table()?;
    for arg in BINDING_COMPILE_ARGS {
      args.push(*arg)?;
    }
    for arg in existing.sequence_values::<LuaValue>() {
      args.push(arg?)?;
    }
    cfg.set(ConfigKey::ExtraCompileArgs.as_str(), args)?;
    Ok(())
  })
}

fn storage_to_config(storage: &LuaTable) -> LuaResult<BuildConfig> {
  let mut config = BuildConfig::default();

  for pair in storage.pairs::<LuaValue, LuaValue>() {
    let (key, value) = pair?;
    let LuaValue::String(key) = key else {
      warn!(key = ?key, "ignoring non-string build config key");
      continue;
    };
    let key = key.to_str()?.to_string();

    let Ok(parsed) = key.parse::<ConfigKey>() else {
      warn!(key = %key, "ignoring unknown build config key");
      continue;
    };

    let value = if parsed.is_flag() {
      ConfigValue::Flag(!matches!(value, LuaValue::Nil | LuaValue::Boolean(false)))
    } else {
      ConfigValue::List(string_list(&key, value)?)
    };
    config.set(&key, value).map_err(LuaError::external)?;
  }

  Ok(config)
}

/// A list value: a sequence of strings, or a single string.
fn string_list(key: &str, value: LuaValue) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(table) => table
      .sequence_values::<String>()
      .collect::<LuaResult<Vec<_>>>()
      .map_err(|e| LuaError::external(format!("cfg['{}'] must be a list of strings: {}", key, e))),
    other => Err(LuaError::external(format!(
      "cfg['{}'] must be a list of strings, got {}",
      key,
      other.type_name()
    ))),
  }
}
