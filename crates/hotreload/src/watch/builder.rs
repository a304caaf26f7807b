//! Builder for starting a watcher.
//!
//! The [`WatchBuilder`] provides a fluent API for choosing what to watch, how
//! changes are detected, where reloads run and who hears about them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use super::config::{SourceSetting, WatchConfig};
use super::context::ExecutionContext;
use super::handle::WatchHandle;
use super::source::{ChangeSource, NativeSource, PollingSource};
use super::target::WatchTarget;
use super::types::{ChangeEvent, WatchError};
use super::watcher::{self, Callbacks};
use crate::error::ReloadError;
use crate::registry::Registry;
use crate::reload::{ReloadReport, Reloader};

/// Callback invoked after each successful reload.
pub type ReloadCallback = Arc<dyn Fn(&ReloadReport) + Send + Sync + 'static>;

/// Callback invoked after each failed reload.
pub type ErrorCallback = Arc<dyn Fn(&ReloadError) + Send + Sync + 'static>;

/// Builder for starting a watcher on a directory of modules.
///
/// # Example
///
/// ```ignore
/// let handle = WatchBuilder::new(Arc::clone(&registry))
///     .watch("scripts")
///     .debounce(Duration::from_millis(100))
///     .on_reload(|report| println!("reloaded {}", report.module))
///     .on_error(|err| eprintln!("{err}"))
///     .start()?;
/// ```
pub struct WatchBuilder {
    registry: Arc<Registry>,
    path: Option<PathBuf>,
    debounce: Duration,
    setting: SourceSetting,
    poll_interval: Duration,
    custom: Option<Box<dyn ChangeSource>>,
    context: Option<Arc<dyn ExecutionContext>>,
    callbacks: Callbacks,
}

impl WatchBuilder {
    /// Creates a builder with default settings.
    ///
    /// Defaults: 200ms debounce, native notifications with polling fallback,
    /// reloads on the watcher thread, no callbacks.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            path: None,
            debounce: WatchConfig::DEFAULT_DEBOUNCE,
            setting: SourceSetting::Auto,
            poll_interval: WatchConfig::DEFAULT_POLL_INTERVAL,
            custom: None,
            context: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the file or directory to watch.
    ///
    /// A file scopes the watcher to its parent directory.
    #[must_use]
    pub fn watch(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets how long a file must stay quiet before it is reloaded.
    #[must_use]
    pub const fn debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Uses native notifications only, without polling fallback.
    #[must_use]
    pub const fn native(mut self) -> Self {
        self.setting = SourceSetting::Native;
        self
    }

    /// Scans the directory every `interval` instead of using notifications.
    #[must_use]
    pub const fn polling(mut self, interval: Duration) -> Self {
        self.setting = SourceSetting::Polling;
        self.poll_interval = interval;
        self
    }

    /// Uses a custom change source, such as a
    /// [`ChannelSource`](super::ChannelSource).
    #[must_use]
    pub fn source(mut self, source: Box<dyn ChangeSource>) -> Self {
        self.custom = Some(source);
        self
    }

    /// Runs reloads on `context` instead of the watcher thread.
    #[must_use]
    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Registers a callback for successful reloads.
    ///
    /// The callback runs wherever the reload ran.
    #[must_use]
    pub fn on_reload<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReloadReport) + Send + Sync + 'static,
    {
        self.callbacks.on_reload = Some(Arc::new(callback));
        self
    }

    /// Registers a callback for failed reloads.
    ///
    /// The previously loaded version of the module stays active.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReloadError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    /// Applies debounce and source settings from a [`WatchConfig`].
    #[must_use]
    pub fn config(mut self, config: WatchConfig) -> Self {
        self.debounce = config.debounce();
        self.setting = config.source;
        self.poll_interval = config.poll_interval();
        self
    }

    /// Starts watching.
    ///
    /// If a watcher is already running on the same root for this registry,
    /// its handle is returned and this builder's settings are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if no path was set, the path does not exist, or
    /// the change source cannot be started.
    pub fn start(self) -> Result<WatchHandle, WatchError> {
        let Self {
            registry,
            path,
            debounce,
            setting,
            poll_interval,
            custom,
            context,
            callbacks,
        } = self;

        let path = path.ok_or_else(|| WatchError::init_failed("no path specified to watch", None))?;
        let target = WatchTarget::new(&path)?.with_context(context);
        let root = target.root().to_path_buf();

        let (handle, started) = registry.watcher_for(&root, || {
            let (source, events) = match custom {
                Some(source) => open(source, &root)?,
                None => open_setting(setting, poll_interval, &root)?,
            };
            tracing::info!(root = %root.display(), source = source.name(), "watching for changes");
            watcher::spawn(
                Reloader::new(Arc::clone(&registry)),
                target,
                source,
                events,
                debounce,
                callbacks,
            )
        })?;

        if !started {
            tracing::debug!(root = %root.display(), "watcher already running for root");
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for WatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchBuilder")
            .field("path", &self.path)
            .field("debounce", &self.debounce)
            .field("setting", &self.setting)
            .field("poll_interval", &self.poll_interval)
            .field("custom_source", &self.custom.is_some())
            .field("context", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

type Opened = (Box<dyn ChangeSource>, Receiver<ChangeEvent>);

fn open(mut source: Box<dyn ChangeSource>, root: &Path) -> Result<Opened, WatchError> {
    let events = source.start(root)?;
    Ok((source, events))
}

fn open_setting(setting: SourceSetting, poll_interval: Duration, root: &Path) -> Result<Opened, WatchError> {
    match setting {
        SourceSetting::Native => open(Box::new(NativeSource::new()), root),
        SourceSetting::Polling => open(Box::new(PollingSource::new(poll_interval)), root),
        SourceSetting::Auto => open(Box::new(NativeSource::new()), root).or_else(|e| {
            tracing::warn!(error = %e, "native file watcher unavailable, falling back to polling");
            open(Box::new(PollingSource::new(poll_interval)), root)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = WatchBuilder::new(Arc::new(Registry::new()));
        assert!(builder.path.is_none());
        assert_eq!(builder.debounce, Duration::from_millis(200));
        assert_eq!(builder.setting, SourceSetting::Auto);
        assert_eq!(builder.poll_interval, Duration::from_secs(2));
        assert!(builder.callbacks.on_reload.is_none());
    }

    #[test]
    fn test_builder_fluent_api() {
        let builder = WatchBuilder::new(Arc::new(Registry::new()))
            .watch("scripts")
            .debounce(Duration::from_millis(50))
            .polling(Duration::from_millis(250))
            .on_reload(|_| {});

        assert_eq!(builder.path, Some(PathBuf::from("scripts")));
        assert_eq!(builder.debounce, Duration::from_millis(50));
        assert_eq!(builder.setting, SourceSetting::Polling);
        assert_eq!(builder.poll_interval, Duration::from_millis(250));
        assert!(builder.callbacks.on_reload.is_some());
    }

    #[test]
    fn test_config_applies_settings() {
        let config = WatchConfig {
            debounce_ms: 10,
            source: SourceSetting::Native,
            poll_interval_ms: 20,
        };
        let builder = WatchBuilder::new(Arc::new(Registry::new())).config(config);
        assert_eq!(builder.debounce, Duration::from_millis(10));
        assert_eq!(builder.setting, SourceSetting::Native);
        assert_eq!(builder.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_start_without_path_fails() {
        let err = WatchBuilder::new(Arc::new(Registry::new())).start().unwrap_err();
        assert!(err.to_string().contains("no path specified"));
    }

    #[test]
    fn test_start_missing_path_fails() {
        let err = WatchBuilder::new(Arc::new(Registry::new()))
            .watch("/definitely/not/here")
            .start()
            .unwrap_err();
        assert!(matches!(err, WatchError::PathError { .. }));
    }
}
