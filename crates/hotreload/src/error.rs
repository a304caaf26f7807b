//! Error types for loading, executing and hot-swapping script modules.
//!
//! | Type | When It Occurs |
//! |------|----------------|
//! | [`RuntimeError`] | Script code failed while running (top level or a call) |
//! | [`ReloadError`] | A module could not be (re)loaded; committed state is unchanged |
//! | [`SwapError`] | A swap was applied but a `reinit` hook failed |
//! | [`CompileError`](crate::script::CompileError) | Source is not valid script syntax |
//!
//! Watch-time errors live in [`WatchError`](crate::watch::WatchError).

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::script::CompileError;

/// Error raised by script code while it runs.
#[derive(Debug, Clone, Error, Diagnostic)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A name was not found in the locals or the module namespace.
    #[error("cannot find `{name}` in module `{module}`")]
    #[diagnostic(code(hotreload::runtime::undefined_name))]
    UndefinedName {
        /// The missing name.
        name: String,
        /// Module whose namespace was searched.
        module: String,
    },

    /// A value that is neither a function, a class nor a proxy was called.
    #[error("value of type {type_name} is not callable")]
    #[diagnostic(code(hotreload::runtime::not_callable))]
    NotCallable {
        /// Type of the called value.
        type_name: &'static str,
    },

    /// Wrong number of arguments.
    #[error("`{function}` takes {expected} argument(s) but {found} were supplied")]
    #[diagnostic(code(hotreload::runtime::arity))]
    Arity {
        /// Called function.
        function: String,
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// Operator applied to unsupported operand types.
    #[error("cannot apply `{op}` to {left} and {right}")]
    #[diagnostic(code(hotreload::runtime::type_mismatch))]
    TypeMismatch {
        /// Operator symbol.
        op: &'static str,
        /// Left operand type.
        left: &'static str,
        /// Right operand type.
        right: &'static str,
    },

    /// A value of the wrong type was used in a typed position.
    #[error("expected {expected} in {context}, found {found}")]
    #[diagnostic(code(hotreload::runtime::type_error))]
    TypeError {
        /// Expected type.
        expected: &'static str,
        /// Actual type.
        found: &'static str,
        /// Where the value was used.
        context: &'static str,
    },

    /// Integer division or remainder by zero.
    #[error("attempt to divide by zero")]
    #[diagnostic(code(hotreload::runtime::division_by_zero))]
    DivisionByZero,

    /// Checked integer arithmetic overflowed.
    #[error("attempt to compute `{op}` with overflow")]
    #[diagnostic(code(hotreload::runtime::overflow))]
    Overflow {
        /// Operator symbol.
        op: &'static str,
    },

    /// Field read on an instance that does not store it.
    #[error("instance of `{class}` has no field `{field}`")]
    #[diagnostic(
        code(hotreload::runtime::no_field),
        help("fields added by a reload can be initialized in a `reinit(&mut self)` method")
    )]
    NoField {
        /// Class of the instance.
        class: String,
        /// Missing field.
        field: String,
    },

    /// Method or associated function not defined.
    #[error("no method `{method}` found for {target}")]
    #[diagnostic(code(hotreload::runtime::no_method))]
    NoMethod {
        /// Class or type the lookup was made on.
        target: String,
        /// Missing method.
        method: String,
    },

    /// Struct literal or `Type::f` path naming something that is not a class.
    #[error("`{name}` is not a struct")]
    #[diagnostic(code(hotreload::runtime::not_a_class))]
    NotAClass {
        /// The name used as a class.
        name: String,
    },

    /// Only functions and classes can be wrapped in a hotswap proxy.
    #[error("value of type {type_name} cannot be hotswapped")]
    #[diagnostic(code(hotreload::runtime::not_wrappable))]
    NotWrappable {
        /// Type of the rejected value.
        type_name: &'static str,
    },

    /// The definition behind a proxy was removed by a reload.
    #[error("`{module}::{name}` was removed by a reload")]
    #[diagnostic(
        code(hotreload::runtime::stale_proxy),
        help("define `{name}` again in module `{module}` to revive this reference")
    )]
    StaleProxy {
        /// Owning module.
        module: String,
        /// Removed definition.
        name: String,
    },

    /// Too many nested calls.
    #[error("recursion limit of {limit} nested calls exceeded")]
    #[diagnostic(code(hotreload::runtime::recursion_limit))]
    RecursionLimit {
        /// The configured limit.
        limit: usize,
    },

    /// A function outlived the module record it belongs to.
    #[error("module `{module}` is no longer loaded")]
    #[diagnostic(code(hotreload::runtime::module_unloaded))]
    ModuleUnloaded {
        /// The missing module.
        module: String,
    },

    /// `break`, `continue` or `return` used where it has no target.
    #[error("`{keyword}` outside of {context}")]
    #[diagnostic(code(hotreload::runtime::control_flow))]
    ControlFlow {
        /// The offending keyword.
        keyword: &'static str,
        /// What it needs to be inside of.
        context: &'static str,
    },

    /// `panic!` was evaluated.
    #[error("script panicked: {message}")]
    #[diagnostic(code(hotreload::runtime::panic))]
    Panic {
        /// The panic message.
        message: String,
    },
}

/// A module could not be loaded or reloaded.
///
/// When this error is returned the module's committed namespace, its proxies
/// and its fingerprint are exactly what they were before the attempt.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ReloadError {
    /// The module source could not be read.
    #[error("failed to read module `{module}` from {path}")]
    #[diagnostic(
        code(hotreload::reload::io),
        help("check that the file exists and is readable")
    )]
    Io {
        /// Module name.
        module: String,
        /// Source path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The new source does not compile.
    #[error("failed to compile module `{module}`")]
    #[diagnostic(code(hotreload::reload::compile))]
    Compile {
        /// Module name.
        module: String,
        /// The compile error with its source snippet.
        #[source]
        #[diagnostic_source]
        source: CompileError,
    },

    /// The module's top level failed while executing.
    #[error("failed to execute module `{module}`")]
    #[diagnostic(
        code(hotreload::reload::execute),
        help("fix the error and save again; the previous version stays active")
    )]
    Execute {
        /// Module name.
        module: String,
        /// The runtime error.
        #[source]
        #[diagnostic_source]
        source: RuntimeError,
    },

    /// The module name is already bound to a different file.
    #[error("module `{module}` is already loaded from {existing}")]
    #[diagnostic(code(hotreload::reload::name_conflict))]
    NameConflict {
        /// Module name.
        module: String,
        /// Path of the loaded module.
        existing: PathBuf,
        /// Path that was requested.
        path: PathBuf,
    },

    /// The file is already loaded under a different module name.
    #[error("{path} is already loaded as module `{existing}`")]
    #[diagnostic(code(hotreload::reload::path_conflict))]
    PathConflict {
        /// Module name that was requested.
        module: String,
        /// Source path.
        path: PathBuf,
        /// Name the file is loaded as.
        existing: String,
    },
}

impl ReloadError {
    /// Name of the module the failed operation was about.
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::Io { module, .. }
            | Self::Compile { module, .. }
            | Self::Execute { module, .. }
            | Self::NameConflict { module, .. }
            | Self::PathConflict { module, .. } => module,
        }
    }
}

/// A swap was applied but a follow-up step failed.
///
/// Swap errors never roll back the swap itself.
#[derive(Debug, Clone, Error, Diagnostic)]
#[non_exhaustive]
pub enum SwapError {
    /// The `reinit` hook failed for one live instance.
    #[error("reinit hook failed for an instance of `{module}::{class}`")]
    #[diagnostic(
        code(hotreload::swap::reinit_failed),
        help("the new class is active; this instance keeps the fields it had before the reload")
    )]
    Reinit {
        /// Owning module.
        module: String,
        /// Class name.
        class: String,
        /// Error raised by the hook.
        #[source]
        #[diagnostic_source]
        source: RuntimeError,
    },
}

/// All reinit failures of one reload, rendered together by `miette`.
#[derive(Debug, Error, Diagnostic)]
#[error("{} reinit hook(s) failed while reloading `{module}`", failures.len())]
#[diagnostic(code(hotreload::swap::reinit_failures))]
pub struct ReinitFailures {
    /// Reloaded module.
    pub module: String,

    /// One entry per failing instance.
    #[related]
    pub failures: Vec<SwapError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::UndefinedName {
            name: "x".into(),
            module: "app::m".into(),
        };
        assert_eq!(err.to_string(), "cannot find `x` in module `app::m`");

        let err = RuntimeError::StaleProxy {
            module: "m".into(),
            name: "f".into(),
        };
        assert!(err.to_string().contains("removed by a reload"));
    }

    #[test]
    fn test_reload_error_module() {
        let err = ReloadError::Execute {
            module: "app::m".into(),
            source: RuntimeError::DivisionByZero,
        };
        assert_eq!(err.module(), "app::m");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_swap_error_display() {
        let err = SwapError::Reinit {
            module: "m".into(),
            class: "Counter".into(),
            source: RuntimeError::Panic {
                message: "boom".into(),
            },
        };
        assert!(err.to_string().contains("m::Counter"));
    }
}
