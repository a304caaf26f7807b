//! Change sources.
//!
//! A [`ChangeSource`] turns filesystem activity below a root into a stream of
//! [`ChangeEvent`]s. The watcher thread owns the source for its whole life.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};

use super::types::{ChangeEvent, ChangeKind, WatchError};

/// Something that reports file changes below a root directory.
pub trait ChangeSource: Send {
    /// Starts observing `root` recursively.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the source cannot observe `root`.
    fn start(&mut self, root: &Path) -> Result<Receiver<ChangeEvent>, WatchError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// The platform notifier (inotify, FSEvents, ReadDirectoryChangesW, ...).
#[derive(Debug, Default)]
pub struct NativeSource {
    watcher: Option<RecommendedWatcher>,
}

impl NativeSource {
    /// Creates an unstarted native source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeSource for NativeSource {
    fn start(&mut self, root: &Path) -> Result<Receiver<ChangeEvent>, WatchError> {
        let (tx, rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res| forward(&tx, res))
            .map_err(|e| WatchError::init_failed(format!("failed to create file watcher: {e}"), Some(e)))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::path_error(root, format!("failed to watch: {e}")))?;
        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Periodic directory scanning, for filesystems without change notification.
#[derive(Debug)]
pub struct PollingSource {
    interval: Duration,
    watcher: Option<PollWatcher>,
}

impl PollingSource {
    /// Default time between scans.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    /// Creates a polling source scanning every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            watcher: None,
        }
    }

    /// Time between scans.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollingSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl ChangeSource for PollingSource {
    fn start(&mut self, root: &Path) -> Result<Receiver<ChangeEvent>, WatchError> {
        let (tx, rx) = unbounded();
        let config = notify::Config::default()
            .with_poll_interval(self.interval)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(move |res| forward(&tx, res), config)
            .map_err(|e| WatchError::init_failed(format!("failed to create poll watcher: {e}"), Some(e)))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::path_error(root, format!("failed to poll: {e}")))?;
        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

/// A source fed by the application through a [`ChangeNotifier`].
///
/// Useful when changes are already known (an editor integration, a build
/// tool) and in tests that need deterministic events.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Option<Receiver<ChangeEvent>>,
}

/// Sending half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: Sender<ChangeEvent>,
}

impl ChannelSource {
    /// Creates a source and the notifier that feeds it.
    #[must_use]
    pub fn new() -> (Self, ChangeNotifier) {
        let (sender, receiver) = unbounded();
        (
            Self {
                receiver: Some(receiver),
            },
            ChangeNotifier { sender },
        )
    }
}

impl ChangeSource for ChannelSource {
    fn start(&mut self, _root: &Path) -> Result<Receiver<ChangeEvent>, WatchError> {
        self.receiver
            .take()
            .ok_or_else(|| WatchError::init_failed("channel source already started", None))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

impl ChangeNotifier {
    /// Reports an event.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelError`] once the watcher is gone.
    pub fn send(&self, event: ChangeEvent) -> Result<(), WatchError> {
        self.sender
            .send(event)
            .map_err(|_| WatchError::channel_error("watcher is no longer receiving changes"))
    }

    /// Reports that `path` was modified.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn modified(&self, path: impl Into<PathBuf>) -> Result<(), WatchError> {
        self.send(ChangeEvent::new(path, ChangeKind::Modified))
    }

    /// Reports that `path` was created.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn created(&self, path: impl Into<PathBuf>) -> Result<(), WatchError> {
        self.send(ChangeEvent::new(path, ChangeKind::Created))
    }

    /// Reports that `path` was removed.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn removed(&self, path: impl Into<PathBuf>) -> Result<(), WatchError> {
        self.send(ChangeEvent::new(path, ChangeKind::Removed))
    }
}

fn forward(tx: &Sender<ChangeEvent>, res: notify::Result<Event>) {
    match res {
        Ok(event) => {
            for change in convert(event) {
                // The receiver is gone once the watcher stopped.
                let _ = tx.send(change);
            }
        }
        Err(e) => tracing::warn!(error = %e, "file watcher reported an error"),
    }
}

/// Maps a notify event to zero or more change events.
fn convert(event: Event) -> Vec<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            return paths
                .next()
                .map(|from| ChangeEvent::new(from, ChangeKind::Removed))
                .into_iter()
                .chain(paths.next().map(|to| ChangeEvent::new(to, ChangeKind::Created)))
                .collect();
        }
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| ChangeEvent::new(path, kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    fn kinds(events: &[ChangeEvent]) -> Vec<(PathBuf, ChangeKind)> {
        events.iter().map(|e| (e.path.clone(), e.kind)).collect()
    }

    #[test]
    fn test_convert_basic_kinds() {
        let created = convert(event(EventKind::Create(CreateKind::File), &["/a.rs"]));
        assert_eq!(kinds(&created), vec![("/a.rs".into(), ChangeKind::Created)]);

        let modified = convert(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/a.rs"],
        ));
        assert_eq!(kinds(&modified), vec![("/a.rs".into(), ChangeKind::Modified)]);

        let removed = convert(event(EventKind::Remove(RemoveKind::File), &["/a.rs"]));
        assert_eq!(kinds(&removed), vec![("/a.rs".into(), ChangeKind::Removed)]);
    }

    #[test]
    fn test_convert_renames() {
        let both = convert(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/tmp.rs", "/a.rs"],
        ));
        assert_eq!(
            kinds(&both),
            vec![
                ("/tmp.rs".into(), ChangeKind::Removed),
                ("/a.rs".into(), ChangeKind::Created),
            ]
        );

        let to = convert(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/a.rs"]));
        assert_eq!(kinds(&to), vec![("/a.rs".into(), ChangeKind::Created)]);
    }

    #[test]
    fn test_convert_ignores_access() {
        let access = convert(event(
            EventKind::Access(notify::event::AccessKind::Any),
            &["/a.rs"],
        ));
        assert!(access.is_empty());
    }

    #[test]
    fn test_channel_source_starts_once() {
        let (mut source, notifier) = ChannelSource::new();
        let rx = source.start(Path::new("/")).unwrap();
        notifier.modified("/a.rs").unwrap();
        assert_eq!(rx.recv().unwrap().path, PathBuf::from("/a.rs"));

        assert!(matches!(
            source.start(Path::new("/")),
            Err(WatchError::InitFailed { .. })
        ));
    }

    #[test]
    fn test_notifier_after_receiver_dropped() {
        let (mut source, notifier) = ChannelSource::new();
        drop(source.start(Path::new("/")).unwrap());
        assert!(matches!(
            notifier.created("/a.rs"),
            Err(WatchError::ChannelError { .. })
        ));
    }
}
