//! Where reloads run.
//!
//! Without a context, reloads run on the watcher thread. Binding a context
//! hands every reload to it instead, so module state is only mutated where
//! the application expects it (for example between frames of a game loop or
//! on one tokio task).

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::types::WatchError;

/// A unit of reload work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs reload jobs one at a time.
pub trait ExecutionContext: Send + Sync {
    /// Queues a job. Must not wait for the job to run.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ContextClosed`] if the context shut down.
    fn schedule(&self, job: Job) -> Result<(), WatchError>;
}

/// A job queue pumped by the thread that owns it.
///
/// ```rust,ignore
/// let queue = Arc::new(ReloadQueue::new());
/// let handle = WatchBuilder::new(registry).watch("scripts").context(queue.clone()).start()?;
/// loop {
///     queue.run_pending();
///     // ... one iteration of application work ...
/// }
/// ```
#[derive(Debug)]
pub struct ReloadQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl ReloadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Runs every job queued so far, returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Runs jobs as they arrive until `timeout` elapsed, returns how many ran.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            match self.receiver.recv_deadline(deadline) {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return ran,
            }
        }
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no job is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for ReloadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for ReloadQueue {
    fn schedule(&self, job: Job) -> Result<(), WatchError> {
        self.sender.send(job).map_err(|_| WatchError::ContextClosed)
    }
}

/// Runs reload jobs serially on one tokio task.
///
/// Jobs run inline on the task, so a reload briefly occupies one worker.
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct TokioContext {
    sender: tokio::sync::mpsc::UnboundedSender<Job>,
}

#[cfg(feature = "async")]
impl TokioContext {
    /// Spawns the job task on `handle`'s runtime.
    #[must_use]
    pub fn new(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
            tracing::debug!("reload task finished");
        });
        Self { sender }
    }

    /// Spawns the job task on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ContextClosed`] when called outside a runtime.
    pub fn current() -> Result<Self, WatchError> {
        tokio::runtime::Handle::try_current()
            .map(|handle| Self::new(&handle))
            .map_err(|_| WatchError::ContextClosed)
    }
}

#[cfg(feature = "async")]
impl ExecutionContext for TokioContext {
    fn schedule(&self, job: Job) -> Result<(), WatchError> {
        self.sender.send(job).map_err(|_| WatchError::ContextClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_queue_runs_on_owner() {
        let queue = ReloadQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            queue
                .schedule(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_run_for_returns_after_timeout() {
        let queue = ReloadQueue::new();
        let started = Instant::now();
        assert_eq!(queue.run_for(Duration::from_millis(30)), 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_jobs_from_other_threads() {
        let queue = Arc::new(ReloadQueue::new());
        let remote = Arc::clone(&queue);
        let thread_id = std::thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&ran_on);

        std::thread::spawn(move || {
            remote
                .schedule(Box::new(move || {
                    *slot.lock() = Some(std::thread::current().id());
                }))
                .unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(queue.run_for(Duration::from_millis(100)), 1);
        assert_eq!(*ran_on.lock(), Some(thread_id));
    }
}
