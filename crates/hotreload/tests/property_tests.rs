//! Property-based tests for hotreload invariants.
//!
//! These tests verify that critical invariants hold for all possible inputs,
//! not just hand-picked test cases.

#![allow(clippy::pedantic)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use hotreload::watch::{ChangeEvent, ChangeKind, Debouncer};
use proptest::prelude::*;

const WINDOW: Duration = Duration::from_millis(200);

fn kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Created),
        Just(ChangeKind::Modified),
        Just(ChangeKind::Removed),
    ]
}

// ============================================================================
// Debouncer Properties
// ============================================================================

mod debounce_properties {
    use super::*;

    proptest! {
        /// K notifications of one path inside one window drain as exactly one change
        #[test]
        fn burst_drains_once(offsets in prop::collection::vec(0u64..200, 1..50)) {
            let debouncer = Debouncer::new();
            let start = Instant::now();
            for offset in &offsets {
                debouncer.notify("/scripts/m.rs", start + Duration::from_millis(*offset));
            }

            let last = offsets.iter().copied().max().unwrap_or(0);
            let settled = start + Duration::from_millis(last) + WINDOW;
            let drained: Vec<_> = debouncer.drain_at(WINDOW, settled).collect();

            prop_assert_eq!(drained.len(), 1);
            prop_assert_eq!(&drained[0].path, &PathBuf::from("/scripts/m.rs"));
            prop_assert_eq!(drained[0].kind, ChangeKind::Modified);
            prop_assert!(debouncer.is_empty());
        }

        /// Nothing drains before the most recent notification is a window old
        #[test]
        fn nothing_drains_early(offsets in prop::collection::vec(0u64..1000, 1..30)) {
            let debouncer = Debouncer::new();
            let start = Instant::now();
            for offset in &offsets {
                debouncer.notify("/scripts/m.rs", start + Duration::from_millis(*offset));
            }

            let last = offsets.iter().copied().max().unwrap_or(0);
            let early = start + Duration::from_millis(last) + WINDOW - Duration::from_millis(1);
            prop_assert_eq!(debouncer.drain_at(WINDOW, early).count(), 0);
            prop_assert!(!debouncer.is_empty());
        }

        /// Every distinct path drains exactly once, first-notified first
        #[test]
        fn distinct_paths_drain_once_in_order(names in prop::collection::vec("[a-z]{1,6}", 1..20)) {
            let debouncer = Debouncer::new();
            let start = Instant::now();
            for (i, name) in names.iter().enumerate() {
                debouncer.notify(format!("/scripts/{name}.rs"), start + Duration::from_millis(i as u64));
            }

            let drained: Vec<PathBuf> = debouncer
                .drain_at(WINDOW, start + Duration::from_secs(10))
                .map(|change| change.path)
                .collect();

            let mut expected = Vec::new();
            let mut seen = HashSet::new();
            for name in &names {
                let path = PathBuf::from(format!("/scripts/{name}.rs"));
                if seen.insert(path.clone()) {
                    expected.push(path);
                }
            }
            prop_assert_eq!(drained, expected);
        }

        /// At most one entry per path regardless of event kinds
        #[test]
        fn mixed_kinds_never_duplicate(kinds in prop::collection::vec(kind(), 1..40)) {
            let debouncer = Debouncer::new();
            let now = Instant::now();
            for kind in &kinds {
                debouncer.record(ChangeEvent { path: "/scripts/m.rs".into(), kind: *kind, at: now });
            }
            prop_assert!(debouncer.len() <= 1);
            prop_assert!(debouncer.drain_all().count() <= 1);
        }
    }
}

// ============================================================================
// Change Kind Collapse Properties
// ============================================================================

mod collapse_properties {
    use super::*;

    proptest! {
        /// Folding a kind into itself never changes it
        #[test]
        fn collapse_is_idempotent(kind in kind()) {
            prop_assert_eq!(kind.then(kind), Some(kind));
        }

        /// A file that ends up removed is never reported as created
        #[test]
        fn removal_wins_over_modification(first in kind()) {
            match first.then(ChangeKind::Removed) {
                None => prop_assert_eq!(first, ChangeKind::Created),
                Some(collapsed) => prop_assert!(collapsed != ChangeKind::Created),
            }
        }
    }
}

// ============================================================================
// Script Compiler Properties
// ============================================================================

mod compile_properties {
    use super::*;
    use std::path::Path;

    proptest! {
        /// The compiler never panics, whatever the input
        #[test]
        fn compile_never_panics(source in ".*") {
            let _ = hotreload::compile(Path::new("fuzz.rs"), &source);
        }

        /// Integer constants survive compile and evaluation
        #[test]
        fn int_consts_evaluate(n in i64::MIN / 2..i64::MAX / 2) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("m.rs");
            std::fs::write(&path, format!("const N: i64 = {n};\nconst M: i64 = N + N;")).unwrap();

            let registry = std::sync::Arc::new(hotreload::Registry::new());
            let module = hotreload::Reloader::new(registry).load("m", &path).unwrap();
            prop_assert_eq!(module.get("M").and_then(|v| v.as_int()), Some(n * 2));
        }
    }
}
