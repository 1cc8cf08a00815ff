use anyhow::Result;

use extbuild_lib::{SearchPath, resolve};

use super::load_settings;

/// Print the source file `module` resolves to on `EXTBUILD_PATH`.
pub fn cmd_resolve(module: &str, opt_in: bool) -> Result<()> {
  let settings = load_settings(None)?;
  let path = resolve(module, opt_in, &SearchPath::from_env(), &settings)?;
  println!("{}", path.display());
  Ok(())
}
