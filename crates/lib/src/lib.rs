//! extbuild-lib: on-demand incremental builds of native extension modules.
//!
//! A load request for a dotted module name is resolved to a native source
//! file, checked for staleness against a checksum trailer stored inside the
//! compiled artifact, rebuilt under a cross-process lock when needed, and
//! loaded:
//! - `resolve`: module name to source file on a search path
//! - `template`: source rendering and `BuildConfig` extraction
//! - `checksum`: the dependency checksum trailer
//! - `lock`: file-based mutual exclusion between builders
//! - `orchestrator`: the build coordinator tying it all together

pub mod build;
pub mod checksum;
pub mod consts;
pub mod lock;
pub mod orchestrator;
pub mod resolve;
pub mod settings;
pub mod template;
pub mod util;

pub use build::{CommandCompiler, CompileRequest, Compiler, DylibLoader, LoadedModule, Loader, ModuleBuild};
pub use orchestrator::{BuildError, Orchestrator};
pub use resolve::{SearchPath, resolve};
pub use settings::Settings;
pub use template::BuildConfig;
