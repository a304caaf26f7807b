//! Watch scope and module resolution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::context::ExecutionContext;
use super::types::WatchError;
use crate::registry::{ModuleRecord, Registry};

/// The directory a watcher observes, plus where its reloads run.
///
/// Watching a directory scopes the watcher to that directory; watching a
/// single file scopes it to the file's parent directory.
#[derive(Clone)]
pub struct WatchTarget {
    root: PathBuf,
    origin: PathBuf,
    context: Option<Arc<dyn ExecutionContext>>,
}

impl WatchTarget {
    /// Creates a target from a file or directory path.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathError`] if the path does not exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let origin = path
            .canonicalize()
            .map_err(|e| WatchError::path_error(path, format!("cannot resolve path: {e}")))?;

        let root = if origin.is_dir() {
            origin.clone()
        } else {
            origin
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| WatchError::path_error(path, "file has no parent directory"))?
        };

        Ok(Self {
            root,
            origin,
            context: None,
        })
    }

    pub(crate) fn with_context(mut self, context: Option<Arc<dyn ExecutionContext>>) -> Self {
        self.context = context;
        self
    }

    /// Canonical directory that scopes this target.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The canonical path the target was created from.
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// The context reloads are scheduled on, if bound.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.context.as_ref()
    }

    /// Whether `path` lies inside the watched root.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Loaded modules whose source is `path`, if `path` is in scope.
    ///
    /// Unknown, new, out-of-scope and non-module files resolve to nothing.
    #[must_use]
    pub fn resolve(&self, registry: &Registry, path: &Path) -> Vec<Arc<ModuleRecord>> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.contains(&path) {
            tracing::debug!(path = %path.display(), root = %self.root.display(), "change outside watched root");
            return Vec::new();
        }

        let records = registry.modules_at(&path);
        if records.is_empty() {
            tracing::debug!(path = %path.display(), "no loaded module for changed file");
        }
        records
    }

    /// Every loaded module inside the watched root.
    #[must_use]
    pub fn modules(&self, registry: &Registry) -> Vec<Arc<ModuleRecord>> {
        registry
            .modules()
            .into_iter()
            .filter(|record| self.contains(record.path()))
            .collect()
    }
}

impl fmt::Debug for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchTarget")
            .field("root", &self.root)
            .field("origin", &self.origin)
            .field("context", &self.context.is_some())
            .finish()
    }
}
