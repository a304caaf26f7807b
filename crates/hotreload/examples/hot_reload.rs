//! Hot reload example demonstrating file watching.
//!
//! This example writes a small script module to a temporary directory, loads
//! it, and watches the directory. Edits to the script are picked up while the
//! host keeps calling the same function handle.
//!
//! # Running
//!
//! ```bash
//! cargo run --example hot_reload
//!
//! # In another terminal, edit the printed file, e.g. change `a + b` to `a * b`
//! ```

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hotreload::watch::WatchBuilder;
use hotreload::{Registry, Reloader, Value};
use miette::IntoDiagnostic;

const SCRIPT: &str = r#"#[hotswap]
fn add(a: i64, b: i64) -> i64 {
    a + b
}

#[hotswap]
struct Greeter {
    name: String,
}

impl Greeter {
    fn new(name: String) -> Greeter {
        Greeter { name: name }
    }

    fn greet(&self) -> String {
        "hello, " + self.name
    }
}
"#;

fn main() -> miette::Result<()> {
    let dir = std::env::temp_dir().join("hotreload_example");
    fs::create_dir_all(&dir).into_diagnostic()?;
    let script = dir.join("demo.rs");
    fs::write(&script, SCRIPT).into_diagnostic()?;

    println!("Script file: {}", script.display());
    println!("Edit this file to see hot reload in action!\n");

    let registry = Arc::new(Registry::new());
    let reloader = Reloader::new(Arc::clone(&registry));
    let module = reloader.load("demo", &script)?;

    let add = module.get("add").ok_or_else(|| miette::miette!("`add` is not defined"))?;
    let greeter = module
        .get("Greeter")
        .ok_or_else(|| miette::miette!("`Greeter` is not defined"))?
        .class_call("new", &["world".into()])?;

    let handle = WatchBuilder::new(Arc::clone(&registry))
        .watch(&dir)
        .debounce(Duration::from_millis(100))
        .on_reload(|report| {
            println!("\n[RELOAD] {} ({})", report.module, report.trigger);
            if !report.swapped.is_empty() {
                println!("  Swapped: {:?}", report.swapped);
            }
            if !report.stale.is_empty() {
                println!("  Stale: {:?}", report.stale);
            }
        })
        .on_error(|err| {
            eprintln!("\n[ERROR] Reload failed: {err}");
            eprintln!("  Previous version is still active");
        })
        .start()?;

    println!("Watching {} (Ctrl+C to exit)\n", handle.root().display());

    loop {
        match add.call(&[Value::Int(2), Value::Int(3)]) {
            Ok(sum) => print!("add(2, 3) = {sum:?}"),
            Err(err) => print!("add failed: {err}"),
        }
        if let Some(instance) = greeter.as_instance() {
            match instance.call_method("greet", &[]) {
                Ok(greeting) => println!("  greet() = {greeting:?}"),
                Err(err) => println!("  greet failed: {err}"),
            }
        }
        thread::sleep(Duration::from_secs(2));
    }
}
