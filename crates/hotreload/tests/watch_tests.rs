//! Integration tests for watching and automatic reloading.
//!
//! Most tests inject changes through a [`ChannelSource`] so they do not
//! depend on platform notification timing; one test exercises polling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hotreload::watch::{ChangeNotifier, ChannelSource, ReloadQueue, WatchBuilder};
use hotreload::{Registry, ReloadError, ReloadTrigger, Reloader, Value, WatchError};
use tempfile::{TempDir, tempdir};

// ============================================================================
// Helpers
// ============================================================================

const ADDER: &str = "#[hotswap]\nfn add(a: i64, b: i64) -> i64 { a + b }\n";

struct Fixture {
    dir: TempDir,
    registry: Arc<Registry>,
    reloader: Reloader,
}

impl Fixture {
    fn new() -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            dir: tempdir().unwrap(),
            reloader: Reloader::new(Arc::clone(&registry)),
            registry,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, source: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, source).unwrap();
        path
    }

    fn builder(&self, debounce: Duration) -> (WatchBuilder, ChangeNotifier) {
        let (source, notifier) = ChannelSource::new();
        let builder = WatchBuilder::new(Arc::clone(&self.registry))
            .watch(self.root())
            .debounce(debounce)
            .source(Box::new(source));
        (builder, notifier)
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&hotreload::ReloadReport) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move |_: &hotreload::ReloadReport| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Reload Behavior
// ============================================================================

#[test]
fn test_burst_of_saves_reloads_once() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();
    let add = module.get("add").unwrap();

    let (reloads, on_reload) = counter();
    let (builder, notifier) = fx.builder(Duration::from_millis(150));
    let handle = builder.on_reload(on_reload).start().unwrap();

    // three saves inside 50ms, only the last content matters
    for body in ["a - b", "a * b", "a + b + 1"] {
        fx.write("adder.rs", &format!("#[hotswap]\nfn add(a: i64, b: i64) -> i64 {{ {body} }}\n"));
        notifier.modified(&path).unwrap();
        thread::sleep(Duration::from_millis(15));
    }

    assert!(wait_until(Duration::from_secs(3), || reloads.load(Ordering::SeqCst) >= 1));
    thread::sleep(Duration::from_millis(400));
    assert_eq!(reloads.load(Ordering::SeqCst), 1);

    let adder = module.get("add").unwrap();
    assert!(Arc::ptr_eq(add.as_proxy().unwrap(), adder.as_proxy().unwrap()));
    assert_eq!(add.call(&[2.into(), 3.into()]).unwrap(), Value::Int(6));
    assert_eq!(module.generation(), 2);

    handle.stop();
}

#[test]
fn test_report_carries_file_trigger() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    fx.reloader.import(fx.root(), &path).unwrap();

    let triggers = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&triggers);
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder
        .on_reload(move |report| seen.lock().unwrap().push(report.trigger.clone()))
        .start()
        .unwrap();

    fx.write("adder.rs", &ADDER.replace("a + b", "b - a"));
    notifier.modified(&path).unwrap();
    assert!(wait_until(Duration::from_secs(3), || !triggers.lock().unwrap().is_empty()));

    let triggers = triggers.lock().unwrap();
    assert!(matches!(&triggers[0], ReloadTrigger::FileModified(p) if p == &path));
    handle.stop();
}

#[test]
fn test_broken_save_reports_error_and_keeps_watching() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    let (reloads, on_reload) = counter();
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder
        .on_reload(on_reload)
        .on_error(move |err: &ReloadError| {
            seen.lock().unwrap().push(matches!(err, ReloadError::Compile { .. }));
        })
        .start()
        .unwrap();

    fx.write("adder.rs", "#[hotswap]\nfn add(a: i64, b: i64) -> i64 { a + }\n");
    notifier.modified(&path).unwrap();
    assert!(wait_until(Duration::from_secs(3), || !errors.lock().unwrap().is_empty()));
    assert_eq!(*errors.lock().unwrap(), vec![true]);
    assert!(handle.is_running());
    assert_eq!(module.get("add").unwrap().call(&[1.into(), 1.into()]).unwrap(), Value::Int(2));

    fx.write("adder.rs", &ADDER.replace("a + b", "a * b"));
    notifier.modified(&path).unwrap();
    assert!(wait_until(Duration::from_secs(3), || reloads.load(Ordering::SeqCst) == 1));
    assert_eq!(module.get("add").unwrap().call(&[3.into(), 3.into()]).unwrap(), Value::Int(9));
    handle.stop();
}

#[test]
fn test_changes_outside_root_are_ignored() {
    let fx = Fixture::new();
    let watched = fx.write("scripts/adder.rs", ADDER);
    let outside = fx.write("vendor/adder.rs", ADDER);
    let inside = fx.reloader.load("adder", &watched).unwrap();
    let other = fx.reloader.load("vendor_adder", &outside).unwrap();

    let (source, notifier) = ChannelSource::new();
    let handle = WatchBuilder::new(Arc::clone(&fx.registry))
        .watch(fx.root().join("scripts"))
        .debounce(Duration::from_millis(20))
        .source(Box::new(source))
        .start()
        .unwrap();

    fx.write("vendor/adder.rs", &ADDER.replace("a + b", "0"));
    fx.write("scripts/unknown.rs", "fn f() {}");
    notifier.modified(&outside).unwrap();
    notifier.created(fx.root().join("scripts/unknown.rs")).unwrap();
    notifier.modified(fx.root().join("scripts/notes.txt")).unwrap();

    thread::sleep(Duration::from_millis(300));
    handle.flush().unwrap();
    assert_eq!(other.generation(), 1);
    assert_eq!(inside.generation(), 1);
    assert!(fx.registry.module("unknown").is_none());
    handle.stop();
}

#[test]
fn test_removed_file_keeps_module() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder
        .on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .start()
        .unwrap();

    fs::remove_file(&path).unwrap();
    notifier.removed(&path).unwrap();
    thread::sleep(Duration::from_millis(200));

    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert_eq!(module.generation(), 1);
    assert_eq!(module.get("add").unwrap().call(&[1.into(), 2.into()]).unwrap(), Value::Int(3));
    handle.stop();
}

// ============================================================================
// Handle Control
// ============================================================================

#[test]
fn test_flush_skips_debounce() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let (builder, notifier) = fx.builder(Duration::from_secs(60));
    let handle = builder.start().unwrap();

    fx.write("adder.rs", &ADDER.replace("a + b", "a + b + 100"));
    notifier.modified(&path).unwrap();
    handle.flush().unwrap();

    assert_eq!(module.generation(), 2);
    assert_eq!(module.get("add").unwrap().call(&[0.into(), 0.into()]).unwrap(), Value::Int(100));

    // nothing changed since, so a second flush is a no-op
    handle.flush().unwrap();
    assert_eq!(module.generation(), 2);
    handle.stop();
}

#[test]
fn test_stop_ends_watcher() {
    let fx = Fixture::new();
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder.start().unwrap();
    let clone = handle.clone();
    assert!(clone.is_running());
    assert_eq!(clone.root(), fx.root().canonicalize().unwrap());

    handle.stop();
    assert!(!clone.is_running());
    assert!(matches!(clone.flush(), Err(WatchError::Stopped)));
    assert!(matches!(
        notifier.modified(fx.root().join("a.rs")),
        Err(WatchError::ChannelError { .. })
    ));
}

#[test]
fn test_dropping_last_handle_stops_watcher() {
    let fx = Fixture::new();
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder.start().unwrap();
    drop(handle);
    assert!(notifier.modified(fx.root().join("a.rs")).is_err());
}

#[test]
fn test_same_root_shares_one_watcher() {
    let fx = Fixture::new();
    let (first, _n1) = fx.builder(Duration::from_millis(20));
    let (second, _n2) = fx.builder(Duration::from_millis(20));
    let a = first.start().unwrap();
    let b = second.start().unwrap();

    a.stop();
    assert!(!b.is_running());

    // a stopped watcher is replaced on the next start
    let (third, _n3) = fx.builder(Duration::from_millis(20));
    let c = third.start().unwrap();
    assert!(c.is_running());
    c.stop();
}

#[test]
fn test_watch_single_file_scopes_to_parent() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let (source, _notifier) = ChannelSource::new();
    let handle = WatchBuilder::new(Arc::clone(&fx.registry))
        .watch(&path)
        .source(Box::new(source))
        .start()
        .unwrap();

    assert_eq!(handle.root(), fx.root().canonicalize().unwrap());
    assert_eq!(handle.target().origin(), path.canonicalize().unwrap());
    handle.stop();
}

// ============================================================================
// Execution Contexts
// ============================================================================

#[test]
fn test_reload_queue_runs_reloads_on_owner_thread() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let queue = Arc::new(ReloadQueue::new());
    let ran_on = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&ran_on);
    let (builder, notifier) = fx.builder(Duration::from_millis(20));
    let handle = builder
        .context(queue.clone())
        .on_reload(move |_| *seen.lock().unwrap() = Some(thread::current().id()))
        .start()
        .unwrap();

    fx.write("adder.rs", &ADDER.replace("a + b", "a - b"));
    notifier.modified(&path).unwrap();

    // the reload waits in the queue until this thread pumps it
    assert!(wait_until(Duration::from_secs(3), || !queue.is_empty()));
    assert_eq!(module.generation(), 1);

    assert_eq!(queue.run_pending(), 1);
    assert_eq!(module.generation(), 2);
    assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
    handle.stop();
}

#[test]
fn test_flush_with_context_schedules() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let queue = Arc::new(ReloadQueue::new());
    let (builder, _notifier) = fx.builder(Duration::from_secs(60));
    let handle = builder.context(queue.clone()).start().unwrap();

    fx.write("adder.rs", &ADDER.replace("a + b", "a % b"));
    handle.flush().unwrap();
    assert_eq!(module.generation(), 1);
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(module.generation(), 2);
    handle.stop();
}

// ============================================================================
// Real Change Sources
// ============================================================================

#[test]
fn test_polling_source_detects_changes() {
    let fx = Fixture::new();
    let path = fx.write("adder.rs", ADDER);
    let module = fx.reloader.import(fx.root(), &path).unwrap();

    let handle = WatchBuilder::new(Arc::clone(&fx.registry))
        .watch(fx.root())
        .debounce(Duration::from_millis(20))
        .polling(Duration::from_millis(50))
        .start()
        .unwrap();

    // let the first scan record the original content
    thread::sleep(Duration::from_millis(200));
    fx.write("adder.rs", &ADDER.replace("a + b", "a + b + 40"));

    assert!(wait_until(Duration::from_secs(5), || module.generation() == 2));
    assert_eq!(module.get("add").unwrap().call(&[1.into(), 1.into()]).unwrap(), Value::Int(42));
    handle.stop();
}

#[test]
fn test_watch_convenience_starts_native_watcher() {
    let fx = Fixture::new();
    let handle = hotreload::watch(&fx.registry, fx.root()).unwrap();
    assert!(handle.is_running());
    handle.stop();
    assert!(!handle.is_running());
}
