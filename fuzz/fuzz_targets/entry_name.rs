//! Fuzz target for EntryName::new with arbitrary string input.
//!
//! Run with: cargo +nightly fuzz run entry_name
//!
//! Every accepted name must stay inside the extraction root:
//! - No parent or current directory segments
//! - Not absolute
//! - No NUL bytes or backslashes

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(name) = arcedit::EntryName::new(input) else {
        return;
    };
    let name = name.as_str();

    assert_eq!(name, input, "name was altered: {:?}", input);
    assert!(!name.starts_with('/'), "absolute name accepted: {:?}", name);
    assert!(!name.contains('\0'), "NUL byte accepted: {:?}", name);
    assert!(!name.contains('\\'), "backslash accepted: {:?}", name);
    assert!(
        name.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != ".."),
        "unsafe segment accepted: {:?}",
        name
    );
});
