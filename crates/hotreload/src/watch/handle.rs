//! User-facing handle for a running watcher.
//!
//! The [`WatchHandle`] controls the background thread started by
//! [`WatchBuilder::start`](super::WatchBuilder::start). Clones share the same
//! watcher; it stops when [`stop`](WatchHandle::stop) is called or when the
//! last handle is dropped.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use super::target::WatchTarget;
use super::types::WatchError;
use super::watcher::WatchCommand;

/// State shared by all clones of a [`WatchHandle`].
pub(crate) struct Shared {
    target: WatchTarget,
    running: Arc<AtomicBool>,
    commands: Sender<WatchCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Shared {
    pub(crate) fn new(
        target: WatchTarget,
        running: Arc<AtomicBool>,
        commands: Sender<WatchCommand>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            target,
            running,
            commands,
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        }
    }

    fn on_watcher_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.send(WatchCommand::Stop);

        if self.on_watcher_thread() {
            return;
        }
        if let Some(thread) = self.thread.lock().take()
            && thread.join().is_err()
        {
            tracing::error!(root = %self.target.root().display(), "watcher thread panicked");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle for controlling a running watcher.
///
/// # Example
///
/// ```ignore
/// let handle = hotreload::watch(&registry, "scripts")?;
///
/// // Reload anything that changed on disk, without waiting for debounce.
/// handle.flush()?;
///
/// handle.stop();
/// assert!(!handle.is_running());
/// ```
#[derive(Clone)]
pub struct WatchHandle {
    shared: Arc<Shared>,
}

impl WatchHandle {
    pub(crate) const fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    /// Stops the watcher and waits for its thread to exit.
    ///
    /// A reload that is already running finishes first. Calling this from a
    /// reload callback on the watcher thread does not wait.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Reloads every changed in-scope module now, skipping the debounce.
    ///
    /// Pending changes are discarded and each loaded module under the root
    /// is checked against its fingerprint. Returns once the check ran, or
    /// once the reloads were scheduled if an execution context is bound.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Stopped`] if the watcher is not running.
    pub fn flush(&self) -> Result<(), WatchError> {
        if !self.is_running() {
            return Err(WatchError::Stopped);
        }

        if self.shared.on_watcher_thread() {
            return self
                .shared
                .commands
                .send(WatchCommand::Flush { done: None })
                .map_err(|_| WatchError::Stopped);
        }

        let (done, finished) = bounded(1);
        self.shared
            .commands
            .send(WatchCommand::Flush { done: Some(done) })
            .map_err(|_| WatchError::Stopped)?;
        finished.recv().map_err(|_| WatchError::Stopped)
    }

    /// Whether the watcher thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// What this watcher observes.
    #[must_use]
    pub fn target(&self) -> &WatchTarget {
        &self.shared.target
    }

    /// The watched root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.shared.target.root()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("root", &self.root())
            .field("running", &self.is_running())
            .finish()
    }
}
