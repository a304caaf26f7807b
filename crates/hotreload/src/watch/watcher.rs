//! The background watcher thread.
//!
//! One thread per watched root owns the change source, feeds its events into
//! a [`Debouncer`], and dispatches settled changes to the [`Reloader`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, never, select, unbounded};

use super::builder::{ErrorCallback, ReloadCallback};
use super::debounce::Debouncer;
use super::handle::{Shared, WatchHandle};
use super::source::ChangeSource;
use super::target::WatchTarget;
use super::types::{ChangeEvent, ChangeKind, PendingChange, WatchError};
use crate::registry::ModuleRecord;
use crate::reload::{ReloadTrigger, Reloader};

/// Longest wait between two debouncer checks.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Commands sent to the watcher thread.
#[derive(Debug)]
pub(crate) enum WatchCommand {
    /// Reload every changed module now; `done` is signalled afterwards.
    Flush { done: Option<Sender<()>> },
    /// Leave the loop.
    Stop,
}

/// Observers notified after each reload attempt.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_reload: Option<ReloadCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Starts the watcher thread for `target`.
///
/// `source` must already be started; `events` is its receiver.
pub(crate) fn spawn(
    reloader: Reloader,
    target: WatchTarget,
    source: Box<dyn ChangeSource>,
    events: Receiver<ChangeEvent>,
    debounce: Duration,
    callbacks: Callbacks,
) -> Result<WatchHandle, WatchError> {
    let running = Arc::new(AtomicBool::new(true));
    let (commands_tx, commands) = unbounded();

    let watcher = Watcher {
        dispatcher: Dispatcher {
            reloader,
            target: target.clone(),
            callbacks: Arc::new(callbacks),
        },
        debouncer: Debouncer::new(),
        debounce,
        running: Arc::clone(&running),
    };

    let thread = thread::Builder::new()
        .name("hotreload-watcher".to_string())
        .spawn(move || watcher.run(&commands, events, source))
        .map_err(|e| WatchError::init_failed(format!("failed to spawn watcher thread: {e}"), None))?;

    Ok(WatchHandle::from_shared(Arc::new(Shared::new(
        target,
        running,
        commands_tx,
        thread,
    ))))
}

struct Watcher {
    dispatcher: Dispatcher,
    debouncer: Debouncer,
    debounce: Duration,
    running: Arc<AtomicBool>,
}

impl Watcher {
    // `_source` keeps the platform watcher alive for the life of the loop.
    fn run(
        self,
        commands: &Receiver<WatchCommand>,
        mut events: Receiver<ChangeEvent>,
        _source: Box<dyn ChangeSource>,
    ) {
        let root = self.dispatcher.target.root().to_path_buf();
        tracing::debug!(root = %root.display(), "watcher thread started");

        while self.running.load(Ordering::Acquire) {
            let mut disconnected = false;
            let mut stop = false;
            let timeout = self
                .debouncer
                .next_ready(self.debounce, Instant::now())
                .map_or(IDLE_TICK, |wait| wait.min(IDLE_TICK));

            select! {
                recv(commands) -> command => match command {
                    Ok(WatchCommand::Flush { done }) => {
                        self.flush(&events);
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    }
                    Ok(WatchCommand::Stop) | Err(_) => stop = true,
                },
                recv(events) -> event => match event {
                    Ok(event) => self.debouncer.record(event),
                    Err(_) => disconnected = true,
                },
                default(timeout) => {}
            }

            if stop {
                break;
            }

            if disconnected {
                tracing::warn!(root = %root.display(), "change source disconnected");
                events = never();
            }

            for change in self.debouncer.drain(self.debounce) {
                self.dispatcher.dispatch(&change);
            }
        }

        self.running.store(false, Ordering::Release);
        tracing::debug!(root = %root.display(), "watcher thread stopped");
    }

    fn flush(&self, events: &Receiver<ChangeEvent>) {
        for event in events.try_iter() {
            self.debouncer.record(event);
        }
        let discarded = self.debouncer.drain_all().count();
        tracing::debug!(discarded, "flushing watched modules");

        for record in self.dispatcher.target.modules(self.dispatcher.reloader.registry()) {
            self.dispatcher.submit(record, ReloadTrigger::Flush);
        }
    }
}

/// Turns settled changes into reload jobs.
#[derive(Clone)]
struct Dispatcher {
    reloader: Reloader,
    target: WatchTarget,
    callbacks: Arc<Callbacks>,
}

impl Dispatcher {
    fn dispatch(&self, change: &PendingChange) {
        let trigger = match change.kind {
            ChangeKind::Removed => {
                tracing::debug!(path = %change.path.display(), "source removed, keeping loaded module");
                return;
            }
            ChangeKind::Created => ReloadTrigger::FileCreated(change.path.clone()),
            ChangeKind::Modified => ReloadTrigger::FileModified(change.path.clone()),
        };

        for record in self.target.resolve(self.reloader.registry(), &change.path) {
            self.submit(record, trigger.clone());
        }
    }

    /// Runs the reload on the bound context, or inline without one.
    fn submit(&self, record: Arc<ModuleRecord>, trigger: ReloadTrigger) {
        let Some(context) = self.target.context() else {
            self.reload(&record, trigger);
            return;
        };

        let this = self.clone();
        let module = record.name().to_string();
        if let Err(e) = context.schedule(Box::new(move || this.reload(&record, trigger))) {
            tracing::error!(module = %module, error = %e, "failed to schedule reload");
        }
    }

    fn reload(&self, record: &Arc<ModuleRecord>, trigger: ReloadTrigger) {
        match self.reloader.reload_if_changed_with(record, trigger) {
            Ok(Some(report)) => {
                if let Some(on_reload) = &self.callbacks.on_reload {
                    on_reload(&report);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    module = err.module(),
                    error = %err,
                    "reload failed, previous version stays active"
                );
                if let Some(on_error) = &self.callbacks.on_error {
                    on_error(&err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::registry::Registry;
    use crate::watch::source::{ChangeNotifier, ChannelSource};

    fn start(dir: &std::path::Path, debounce: Duration, callbacks: Callbacks) -> (WatchHandle, ChangeNotifier, Reloader) {
        let reloader = Reloader::new(Arc::new(Registry::new()));
        let target = WatchTarget::new(dir).unwrap();
        let (mut source, notifier) = ChannelSource::new();
        let events = source.start(target.root()).unwrap();
        let handle = spawn(reloader.clone(), target, Box::new(source), events, debounce, callbacks).unwrap();
        (handle, notifier, reloader)
    }

    #[test]
    fn test_stop_joins_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _notifier, _) = start(dir.path(), Duration::from_millis(10), Callbacks::default());
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
        assert!(matches!(handle.flush(), Err(WatchError::Stopped)));
    }

    #[test]
    fn test_flush_reloads_changed_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.rs");
        std::fs::write(&path, "const X: i64 = 1;").unwrap();

        let triggers = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&triggers);
        let callbacks = Callbacks {
            on_reload: Some(Arc::new(move |report: &crate::ReloadReport| {
                seen.lock().unwrap().push(report.trigger.clone());
            })),
            on_error: None,
        };
        let (handle, _notifier, reloader) = start(dir.path(), Duration::from_secs(60), callbacks);
        let record = reloader.load("m", &path).unwrap();

        handle.flush().unwrap();
        assert!(triggers.lock().unwrap().is_empty());

        std::fs::write(&path, "const X: i64 = 2;").unwrap();
        handle.flush().unwrap();
        assert_eq!(*triggers.lock().unwrap(), vec![ReloadTrigger::Flush]);
        assert_eq!(record.get("X").and_then(|v| v.as_int()), Some(2));
    }
}
