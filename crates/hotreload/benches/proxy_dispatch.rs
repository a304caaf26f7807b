//! Performance benchmarks for proxy dispatch and reloading.
//!
//! Run with: `cargo bench -p hotreload`
//!
//! Compares calls through a [`HotswapProxy`] with calls to the same function
//! held directly, and measures the cost of the reload pipeline stages.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use hotreload::{Implementation, ModuleRecord, Registry, Reloader, Value};
use tempfile::TempDir;

const SOURCE: &str = r#"
#[hotswap]
fn add(a: i64, b: i64) -> i64 {
    a + b
}

fn plain_add(a: i64, b: i64) -> i64 {
    a + b
}

#[hotswap]
struct Counter {
    count: i64,
}

impl Counter {
    fn new() -> Counter {
        Counter { count: 0 }
    }

    fn bump(&mut self) -> i64 {
        self.count += 1;
        self.count
    }
}
"#;

fn main() {
    divan::main();
}

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    reloader: Reloader,
    module: Arc<ModuleRecord>,
}

static FIXTURE: LazyLock<Fixture> = LazyLock::new(|| {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.rs");
    std::fs::write(&path, SOURCE).unwrap();

    let reloader = Reloader::new(Arc::new(Registry::new()));
    let module = reloader.load("bench", &path).unwrap();
    Fixture {
        _dir: dir,
        path,
        reloader,
        module,
    }
});

fn args() -> [Value; 2] {
    [Value::Int(2), Value::Int(3)]
}

// ============================================================================
// Dispatch
// ============================================================================

#[divan::bench]
fn call_plain_function(bencher: divan::Bencher) {
    let plain = FIXTURE.module.get("plain_add").unwrap();
    let args = args();
    bencher.bench(|| plain.call(divan::black_box(&args)).unwrap());
}

#[divan::bench]
fn call_through_proxy(bencher: divan::Bencher) {
    let add = FIXTURE.module.get("add").unwrap();
    let args = args();
    bencher.bench(|| add.call(divan::black_box(&args)).unwrap());
}

#[divan::bench]
fn call_method_on_proxied_instance(bencher: divan::Bencher) {
    let counter = FIXTURE.module.get("Counter").unwrap();
    let instance = counter.class_call("new", &[]).unwrap();
    let instance = instance.as_instance().unwrap().clone();
    bencher.bench(|| instance.call_method("bump", &[]).unwrap());
}

// ============================================================================
// Swapping
// ============================================================================

#[divan::bench]
fn swap_implementation(bencher: divan::Bencher) {
    let add = FIXTURE.module.get("add").unwrap();
    let proxy = add.as_proxy().unwrap().clone();
    let implementation = proxy.implementation();
    bencher.bench(|| proxy.swap(Implementation::clone(&implementation)));
}

#[divan::bench(args = [0, 16, 256])]
fn reinitialize_instances(bencher: divan::Bencher, live: usize) {
    let counter = FIXTURE.module.get("Counter").unwrap();
    let instances: Vec<Value> = (0..live)
        .map(|_| counter.class_call("new", &[]).unwrap())
        .collect();
    let proxy = counter.as_proxy().unwrap().clone();
    bencher.bench(|| proxy.reinitialize());
    drop(instances);
}

// ============================================================================
// Pipeline
// ============================================================================

#[divan::bench]
fn compile_module() {
    hotreload::compile(divan::black_box(Path::new("bench.rs")), SOURCE).unwrap();
}

#[divan::bench]
fn reload_module() {
    FIXTURE.reloader.reload(&FIXTURE.module).unwrap();
}

#[divan::bench]
fn reload_if_changed_unchanged() {
    FIXTURE
        .reloader
        .reload_if_changed(&FIXTURE.module)
        .unwrap();
}

#[divan::bench]
fn resolve_module_by_path() -> usize {
    FIXTURE
        .reloader
        .registry()
        .modules_at(divan::black_box(&FIXTURE.path))
        .len()
}
