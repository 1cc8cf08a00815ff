//! Build state and the native toolchain collaborators.
//!
//! # Submodules
//!
//! - [`compiler`] - The `Compiler` trait and the command-line driver implementation
//! - [`loader`] - The `Loader` trait and the shared-library implementation
//! - `types` - `ModuleBuild`, the state threaded through one build request

pub mod compiler;
pub mod loader;
mod types;

pub use compiler::{CommandCompiler, CompileError, CompileRequest, Compiler};
pub use loader::{DylibLoader, LoadError, LoadedModule, Loader};
pub use types::*;
