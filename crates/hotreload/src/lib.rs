//! # hotreload
//!
//! Live code reloading for long-running Rust hosts.
//!
//! `hotreload` loads *script modules* (files written in a small subset of
//! Rust syntax), watches them on disk, and when one changes re-executes it and
//! patches the definitions the running program already holds. Functions and
//! classes marked for hotswapping are reached through a [`HotswapProxy`] whose
//! identity never changes, so references handed out before a reload call the
//! new code afterwards. Objects created before a reload keep their field
//! values and pick up the new methods.
//!
//! ## Features
//!
//! - **Atomic reloads** - a module that fails to read, compile or execute
//!   stays exactly as it was
//! - **Stable identity** - proxies survive any number of reloads
//! - **Instance patching** - live objects switch to new methods, with an
//!   optional `reinit` hook per object
//! - **Debounced watching** - native notifications or polling, scoped to one
//!   directory tree
//! - **Execution contexts** - run reloads on a queue or tokio task you own
//! - **Rich diagnostics** - compile errors point at the offending span via
//!   [`miette`]
//!
//! ## Quick Start
//!
//! `scripts/adder.rs`:
//!
//! ```rust,ignore
//! #[hotswap]
//! fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//! ```
//!
//! Host:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hotreload::{Registry, Reloader};
//!
//! fn main() -> hotreload::Result<()> {
//!     let registry = Arc::new(Registry::new());
//!     let reloader = Reloader::new(Arc::clone(&registry));
//!     let adder = reloader.import("scripts", "scripts/adder.rs")?;
//!     let add = adder.get("add").expect("defined");
//!
//!     let _watcher = hotreload::watch(&registry, "scripts")?;
//!     loop {
//!         // Edit adder.rs and save: the next call runs the new body.
//!         println!("{}", add.call(&[2.into(), 3.into()])?);
//!         std::thread::sleep(std::time::Duration::from_secs(1));
//!     }
//! }
//! ```
//!
//! ## Marking Definitions
//!
//! | Marker | Effect |
//! |--------|--------|
//! | `#[hotswap]` on a `fn` or `struct` | That definition is proxied |
//! | `#[hotswap]` on an `impl` block | The struct it implements is proxied |
//! | `const HOTSWAP: bool = true;` (once per module) | Every top-level `fn` and `struct` is proxied |
//! | [`Registry::wrap`] | Proxies a host-held function or class |
//!
//! A method `fn reinit(&mut self)` on a proxied class runs once per live
//! instance after each swap. Instances built by the module's own top level
//! during that reload already use the new class and are skipped.
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | `async` | [`TokioContext`](watch::TokioContext) for running reloads on tokio | No |
//! | `toml` | Read [`WatchConfig`](watch::WatchConfig) from TOML | No |
//! | `full` | Enable all features | No |
//!
//! ## Error Handling
//!
//! Every error type implements [`miette::Diagnostic`] with a `hotreload::*`
//! code and help text:
//!
//! ```rust,ignore
//! match reloader.reload(&module) {
//!     Ok(report) => println!("swapped {:?}", report.swapped),
//!     Err(e) => eprintln!("{:?}", miette::Report::new(e)),
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Re-export miette for error handling.
/// Users can use `hotreload::miette` instead of adding miette as a dependency.
pub use miette;

// ============================================================================
// Core Modules
// ============================================================================

mod error;
pub use error::{ReinitFailures, ReloadError, RuntimeError, SwapError};

/// A Result type that displays errors with miette's fancy formatting.
///
/// ```rust,ignore
/// fn main() -> hotreload::Result<()> {
///     let module = reloader.load("game", "scripts/game.rs")?;
///     Ok(())
/// }
/// ```
pub type Result<T> = miette::Result<T>;

pub mod script;
pub use script::{CompileError, compile};

mod value;
pub use value::{Class, Function, Instance, Namespace, Value};

// ============================================================================
// Reloading
// ============================================================================

mod hotswap;
pub use hotswap::{HotswapProxy, Implementation, REINIT_HOOK};

mod registry;
pub use registry::{Fingerprint, ModuleRecord, Registry, module_name};

mod reload;
pub use reload::{ReloadReport, ReloadTrigger, Reloader};

// ============================================================================
// Change Detection
// ============================================================================

pub mod watch;
pub use watch::{WatchBuilder, WatchError, WatchHandle, watch};
