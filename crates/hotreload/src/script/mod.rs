//! Script modules: the reloadable unit of code.
//!
//! A script module is a source file written in a dynamically typed subset of
//! Rust syntax. It is parsed with [`syn`], lowered into the owned IR in
//! [`ast`], and executed by a tree-walking interpreter.
//!
//! ```rust,ignore
//! const HOTSWAP: bool = true; // wrap every function and struct below
//!
//! struct Counter {
//!     count: i64,
//! }
//!
//! impl Counter {
//!     fn new() -> Self {
//!         Counter { count: 0 }
//!     }
//!
//!     fn incr(&mut self) -> i64 {
//!         self.count += 1;
//!         self.count
//!     }
//!
//!     // Called on every live instance after the class is swapped.
//!     fn reinit(&mut self) {}
//! }
//!
//! #[hotswap]
//! fn adder(x: i64, y: i64) -> i64 {
//!     x + y
//! }
//! ```

pub mod ast;
mod error;
pub(crate) mod eval;
mod lower;

use std::path::Path;

pub use ast::ModuleAst;
pub use error::CompileError;
pub use lower::{HOTSWAP_ATTR, HOTSWAP_FLAG};

use error::ErrorContext;

/// Parses and lowers a script module.
///
/// `path` is only used for diagnostics.
///
/// # Errors
///
/// Returns [`CompileError`] when the source is not valid Rust syntax or uses
/// constructs outside the script subset.
pub fn compile(path: &Path, source: &str) -> Result<ModuleAst, CompileError> {
    let errors = ErrorContext::new(path, source);
    let file = syn::parse_file(source).map_err(|err| errors.syntax(&err))?;
    lower::lower_file(&file, &errors)
}
