#![no_main]

use std::collections::HashSet;
use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use hotreload::watch::{ChangeEvent, ChangeKind, Debouncer};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Kind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Arbitrary)]
struct Notification {
    file: u8,
    kind: Kind,
    offset_ms: u16,
}

fuzz_target!(|notifications: Vec<Notification>| {
    let debouncer = Debouncer::new();
    let start = Instant::now();
    let mut paths = HashSet::new();

    for n in &notifications {
        let path = format!("/scripts/{}.rs", n.file % 8);
        paths.insert(path.clone());
        let kind = match n.kind {
            Kind::Created => ChangeKind::Created,
            Kind::Modified => ChangeKind::Modified,
            Kind::Removed => ChangeKind::Removed,
        };
        debouncer.record(ChangeEvent {
            path: path.into(),
            kind,
            at: start + Duration::from_millis(u64::from(n.offset_ms)),
        });
    }

    // === At most one pending entry per path ===
    assert!(debouncer.len() <= paths.len());

    // === A full drain yields each path at most once and empties the buffer ===
    let drained: Vec<_> = debouncer.drain_all().map(|change| change.path).collect();
    let unique: HashSet<_> = drained.iter().collect();
    assert_eq!(unique.len(), drained.len());
    assert!(debouncer.is_empty());
});
