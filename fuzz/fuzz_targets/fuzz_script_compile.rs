#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // === Compilation should never panic ===
    let result = hotreload::compile(Path::new("fuzz.rs"), data);

    // === Rendering the diagnostic should never panic ===
    if let Err(err) = result {
        let _ = format!("{err}");
        let _ = format!("{:?}", hotreload::miette::Report::new(err));
    }
});
