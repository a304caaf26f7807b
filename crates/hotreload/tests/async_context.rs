//! Reloads bound to a tokio runtime.

#![cfg(feature = "async")]

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotreload::watch::{ChannelSource, TokioContext, WatchBuilder, WatchError};
use hotreload::{Registry, Reloader, Value};
use tempfile::tempdir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

#[test]
fn test_reloads_run_on_runtime() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("adder.rs");
    fs::write(&path, "#[hotswap]\nfn add(a: i64, b: i64) -> i64 { a + b }\n").unwrap();

    let registry = Arc::new(Registry::new());
    let module = Reloader::new(Arc::clone(&registry)).load("adder", &path).unwrap();

    let rt = runtime();
    let context = Arc::new(TokioContext::new(rt.handle()));
    let ran_on = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&ran_on);

    let (source, notifier) = ChannelSource::new();
    let handle = WatchBuilder::new(Arc::clone(&registry))
        .watch(dir.path())
        .debounce(Duration::from_millis(20))
        .source(Box::new(source))
        .context(context)
        .on_reload(move |_| *seen.lock().unwrap() = Some(std::thread::current().id()))
        .start()
        .unwrap();

    fs::write(&path, "#[hotswap]\nfn add(a: i64, b: i64) -> i64 { a * b }\n").unwrap();
    notifier.modified(&path).unwrap();

    // the current-thread runtime only makes progress inside block_on
    rt.block_on(async {
        for _ in 0..300 {
            if module.generation() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    assert_eq!(module.generation(), 2);
    assert_eq!(module.get("add").unwrap().call(&[4.into(), 5.into()]).unwrap(), Value::Int(20));
    assert_eq!(*ran_on.lock().unwrap(), Some(std::thread::current().id()));
    handle.stop();
}

#[test]
fn test_current_outside_runtime_fails() {
    assert!(matches!(TokioContext::current(), Err(WatchError::ContextClosed)));

    let rt = runtime();
    let context = rt.block_on(async { TokioContext::current() });
    assert!(context.is_ok());
}
