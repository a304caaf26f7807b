//! Core types for change detection.
//!
//! - [`WatchError`] - Errors raised while starting or controlling a watcher
//! - [`ChangeEvent`] - A raw filesystem change reported by a change source
//! - [`ChangeKind`] - What happened to the file
//! - [`PendingChange`] - A debounced change ready for dispatch

use std::path::PathBuf;
use std::time::Instant;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for watch operations.
///
/// Start-time errors are fatal to the watcher being started. Once a watcher
/// runs, reload failures are reported as
/// [`ReloadError`](crate::ReloadError)s and never stop it.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum WatchError {
    /// Failed to initialize the change source.
    #[error("failed to initialize file watcher: {message}")]
    #[diagnostic(
        code(hotreload::watch::init_failed),
        help("check that the path exists and that the platform supports file notifications")
    )]
    InitFailed {
        /// Human-readable error message.
        message: String,
        /// The underlying notify error, if available.
        #[source]
        source: Option<notify::Error>,
    },

    /// Failed to watch a specific path.
    #[error("failed to watch path '{path}': {message}")]
    #[diagnostic(
        code(hotreload::watch::path_error),
        help("ensure the path exists and you have read permissions")
    )]
    PathError {
        /// The path that could not be watched.
        path: PathBuf,
        /// Human-readable error message.
        message: String,
    },

    /// The watcher has been stopped.
    #[error("watcher has been stopped")]
    #[diagnostic(
        code(hotreload::watch::stopped),
        help("start a new watcher if you need to continue watching for changes")
    )]
    Stopped,

    /// Channel communication error.
    #[error("internal channel error: {message}")]
    #[diagnostic(code(hotreload::watch::channel_error))]
    ChannelError {
        /// Human-readable error message.
        message: String,
    },

    /// The execution context no longer accepts jobs.
    #[error("execution context is closed")]
    #[diagnostic(
        code(hotreload::watch::context_closed),
        help("the runtime or queue the watcher was bound to has shut down")
    )]
    ContextClosed,
}

impl WatchError {
    /// Create a new `InitFailed` error.
    pub fn init_failed(message: impl Into<String>, source: Option<notify::Error>) -> Self {
        Self::InitFailed {
            message: message.into(),
            source,
        }
    }

    /// Create a new `PathError`.
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PathError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new `ChannelError`.
    pub fn channel_error(message: impl Into<String>) -> Self {
        Self::ChannelError {
            message: message.into(),
        }
    }
}

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The file appeared (including the target of a rename).
    Created,
    /// The file content or metadata changed.
    Modified,
    /// The file disappeared (including the source of a rename).
    Removed,
}

impl ChangeKind {
    /// Folds a later change of the same file into this one.
    ///
    /// Returns `None` when the two cancel out (created, then removed).
    #[must_use]
    pub const fn then(self, next: Self) -> Option<Self> {
        match (self, next) {
            (Self::Created, Self::Removed) => None,
            (Self::Removed, Self::Created | Self::Modified) => Some(Self::Modified),
            (Self::Modified, Self::Removed) => Some(Self::Removed),
            (first, _) => Some(first),
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        })
    }
}

/// A raw change reported by a [`ChangeSource`](super::ChangeSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The changed path, as reported (not necessarily canonical).
    pub path: PathBuf,

    /// What happened.
    pub kind: ChangeKind,

    /// When the change was observed.
    pub at: Instant,
}

impl ChangeEvent {
    /// Creates an event observed now.
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            at: Instant::now(),
        }
    }

    /// Creates a `Modified` event observed now.
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Modified)
    }
}

/// A change that has settled for at least the debounce interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// The changed path.
    pub path: PathBuf,

    /// The collapsed kind of all events seen in the window.
    pub kind: ChangeKind,

    /// When the first event of the burst was seen.
    pub first_seen: Instant,

    /// When the last event of the burst was seen.
    pub last_seen: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_error_display() {
        let err = WatchError::init_failed("test error", None);
        assert!(err.to_string().contains("test error"));

        let err = WatchError::path_error("/test/path", "permission denied");
        assert!(err.to_string().contains("/test/path"));

        assert!(WatchError::ContextClosed.to_string().contains("closed"));
    }

    #[test]
    fn test_change_kind_collapse() {
        use ChangeKind::{Created, Modified, Removed};

        assert_eq!(Created.then(Removed), None);
        assert_eq!(Removed.then(Created), Some(Modified));
        assert_eq!(Removed.then(Modified), Some(Modified));
        assert_eq!(Modified.then(Removed), Some(Removed));
        assert_eq!(Created.then(Modified), Some(Created));
        assert_eq!(Modified.then(Modified), Some(Modified));
        assert_eq!(Removed.then(Removed), Some(Removed));
    }
}
