//! Debouncing and coalescing of raw change events.
//!
//! Every path has at most one pending entry. An entry becomes ready once no
//! new event arrived for it during the debounce interval, so a burst of saves
//! produces a single reload. A path that keeps changing faster than the
//! interval is never drained; bulk edits settle before anything reloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::types::{ChangeEvent, ChangeKind, PendingChange};

#[derive(Debug)]
struct Entry {
    kind: ChangeKind,
    first_seen: Instant,
    last_seen: Instant,
    /// Insertion counter, breaks ties between equal `first_seen` values.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<PathBuf, Entry>,
    next_seq: u64,
}

/// Changes removed from a [`Debouncer`], first-notified first.
pub type Drain = std::vec::IntoIter<PendingChange>;

/// Thread-safe set of pending changes.
#[derive(Debug, Default)]
pub struct Debouncer {
    state: Mutex<State>,
}

impl Debouncer {
    /// Creates an empty debouncer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a modification of `path` observed at `at`.
    pub fn notify(&self, path: impl Into<PathBuf>, at: Instant) {
        self.record(ChangeEvent {
            path: path.into(),
            kind: ChangeKind::Modified,
            at,
        });
    }

    /// Records a change event, folding it into the pending entry for its path.
    pub fn record(&self, event: ChangeEvent) {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&event.path) {
            match entry.kind.then(event.kind) {
                Some(kind) => {
                    entry.kind = kind;
                    entry.last_seen = entry.last_seen.max(event.at);
                }
                None => {
                    state.entries.remove(&event.path);
                }
            }
            return;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            event.path,
            Entry {
                kind: event.kind,
                first_seen: event.at,
                last_seen: event.at,
                seq,
            },
        );
    }

    /// Removes and returns the changes that settled for at least `interval`.
    pub fn drain(&self, interval: Duration) -> Drain {
        self.drain_at(interval, Instant::now())
    }

    /// Like [`drain`](Self::drain) with an explicit clock reading.
    ///
    /// Changes are returned first-notified first.
    pub fn drain_at(&self, interval: Duration, now: Instant) -> Drain {
        let mut state = self.state.lock();
        let ready: Vec<PathBuf> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) >= interval)
            .map(|(path, _)| path.clone())
            .collect();

        let mut drained: Vec<_> = ready
            .into_iter()
            .filter_map(|path| state.entries.remove_entry(&path))
            .collect();
        drop(state);

        sort_and_convert(&mut drained)
    }

    /// Removes and returns every pending change regardless of age.
    pub fn drain_all(&self) -> Drain {
        let mut drained: Vec<_> = self.state.lock().entries.drain().collect();
        sort_and_convert(&mut drained)
    }

    /// How long until the next entry becomes ready, `None` if nothing is pending.
    #[must_use]
    pub fn next_ready(&self, interval: Duration, now: Instant) -> Option<Duration> {
        self.state
            .lock()
            .entries
            .values()
            .map(|entry| (entry.last_seen + interval).saturating_duration_since(now))
            .min()
    }

    /// Whether a change for `path` is pending.
    #[must_use]
    pub fn is_pending(&self, path: &Path) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    /// Number of pending paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

fn sort_and_convert(drained: &mut Vec<(PathBuf, Entry)>) -> Drain {
    drained.sort_by_key(|(_, entry)| (entry.first_seen, entry.seq));
    drained
        .drain(..)
        .map(|(path, entry)| PendingChange {
            path,
            kind: entry.kind,
            first_seen: entry.first_seen,
            last_seen: entry.last_seen,
        })
        .collect::<Vec<_>>()
        .into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[test]
    fn test_burst_collapses_to_one_entry() {
        let debouncer = Debouncer::new();
        let start = Instant::now();
        for i in 0..3 {
            debouncer.notify("/app/m.rs", start + Duration::from_millis(i * 20));
        }

        assert_eq!(debouncer.drain_at(WINDOW, start + Duration::from_millis(100)).count(), 0);

        let drained: Vec<_> = debouncer
            .drain_at(WINDOW, start + Duration::from_millis(300))
            .collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].path, PathBuf::from("/app/m.rs"));
        assert_eq!(drained[0].first_seen, start);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_drain_order_is_first_notified_first() {
        let debouncer = Debouncer::new();
        let start = Instant::now();
        debouncer.notify("/app/b.rs", start);
        debouncer.notify("/app/a.rs", start + Duration::from_millis(5));
        debouncer.notify("/app/b.rs", start + Duration::from_millis(10));

        let paths: Vec<_> = debouncer
            .drain_at(WINDOW, start + Duration::from_secs(1))
            .map(|change| change.path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/app/b.rs"), PathBuf::from("/app/a.rs")]);
    }

    #[test]
    fn test_keeps_changing_path_is_never_drained() {
        let debouncer = Debouncer::new();
        let start = Instant::now();
        for i in 0..50 {
            let at = start + Duration::from_millis(i * 100);
            debouncer.notify("/app/hot.rs", at);
            assert_eq!(debouncer.drain_at(WINDOW, at).count(), 0);
        }
        assert!(debouncer.is_pending(Path::new("/app/hot.rs")));
    }

    #[test]
    fn test_created_then_removed_cancels() {
        let debouncer = Debouncer::new();
        let now = Instant::now();
        debouncer.record(ChangeEvent {
            path: "/app/tmp.rs".into(),
            kind: ChangeKind::Created,
            at: now,
        });
        debouncer.record(ChangeEvent {
            path: "/app/tmp.rs".into(),
            kind: ChangeKind::Removed,
            at: now,
        });
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_next_ready() {
        let debouncer = Debouncer::new();
        let start = Instant::now();
        assert_eq!(debouncer.next_ready(WINDOW, start), None);

        debouncer.notify("/app/m.rs", start);
        assert_eq!(
            debouncer.next_ready(WINDOW, start + Duration::from_millis(50)),
            Some(Duration::from_millis(150))
        );
        assert_eq!(
            debouncer.next_ready(WINDOW, start + Duration::from_secs(5)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_drain_all_ignores_age() {
        let debouncer = Debouncer::new();
        let now = Instant::now();
        debouncer.notify("/app/a.rs", now);
        debouncer.notify("/app/b.rs", now);
        assert_eq!(debouncer.drain_all().count(), 2);
        assert!(debouncer.is_empty());
    }
}
