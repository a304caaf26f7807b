//! Change detection and automatic reloading.
//!
//! A watcher observes a directory tree, works out which loaded modules the
//! changed files belong to, and reloads them through the same pipeline as
//! [`Reloader::reload`](crate::Reloader::reload).
//!
//! # Features
//!
//! - **Change sources** - native notifications, polling, or changes pushed
//!   by the application ([`ChannelSource`])
//! - **Debouncing** - a burst of saves to one file produces a single reload
//! - **Scoping** - only modules below the watched root are ever reloaded
//! - **Execution contexts** - reloads can run on a queue the application
//!   pumps, or on a tokio task, instead of the watcher thread
//! - **Error resilience** - a broken save keeps the previous version active
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hotreload::{Registry, Reloader, watch::WatchBuilder};
//!
//! let registry = Arc::new(Registry::new());
//! let reloader = Reloader::new(Arc::clone(&registry));
//! let game = reloader.import("scripts", "scripts/game.rs")?;
//!
//! let handle = WatchBuilder::new(Arc::clone(&registry))
//!     .watch("scripts")
//!     .on_reload(|report| println!("{} swapped {:?}", report.module, report.swapped))
//!     .on_error(|err| eprintln!("{err}"))
//!     .start()?;
//!
//! // Proxies handed out before a reload call the new code afterwards.
//! let update = game.get("update").unwrap();
//! loop {
//!     update.call(&[])?;
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌─────────────┐     ┌──────────┐
//! │ ChangeSource │────▶│ Debouncer  │────▶│ WatchTarget │────▶│ Reloader │
//! │  (events)    │     │ (coalesce) │     │  (resolve)  │     │ (commit) │
//! └──────────────┘     └────────────┘     └─────────────┘     └──────────┘
//!                            ▲                                      │
//!                            │                                      ▼
//!                     ┌─────────────┐                      ┌────────────────┐
//!                     │ WatchHandle │                      │ Callbacks /    │
//!                     │ (flush/stop)│                      │ ExecutionCtx   │
//!                     └─────────────┘                      └────────────────┘
//! ```
//!
//! # Error Handling
//!
//! Errors that prevent a watcher from starting are returned from
//! [`WatchBuilder::start`] as [`WatchError`]s. After that, nothing stops the
//! watcher except [`WatchHandle::stop`]: failed reloads are logged with
//! `tracing` and passed to the `on_error` callback, and the module keeps its
//! last good version.

mod builder;
mod config;
mod context;
mod debounce;
pub(crate) mod handle;
mod source;
mod target;
mod types;
mod watcher;

use std::path::Path;
use std::sync::Arc;

use crate::registry::Registry;

// Public API
pub use builder::{ErrorCallback, ReloadCallback, WatchBuilder};
#[cfg(feature = "toml")]
pub use config::ConfigError;
pub use config::{SourceSetting, WatchConfig};
#[cfg(feature = "async")]
pub use context::TokioContext;
pub use context::{ExecutionContext, Job, ReloadQueue};
pub use debounce::{Debouncer, Drain};
pub use handle::WatchHandle;
pub use source::{ChangeNotifier, ChangeSource, ChannelSource, NativeSource, PollingSource};
pub use target::WatchTarget;
pub use types::{ChangeEvent, ChangeKind, PendingChange, WatchError};

/// Watches `path` with default settings.
///
/// Shorthand for `WatchBuilder::new(registry).watch(path).start()`.
///
/// # Errors
///
/// See [`WatchBuilder::start`].
pub fn watch(registry: &Arc<Registry>, path: impl AsRef<Path>) -> Result<WatchHandle, WatchError> {
    WatchBuilder::new(Arc::clone(registry)).watch(path).start()
}
