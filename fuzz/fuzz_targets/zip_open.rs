//! Fuzz target for opening and editing arbitrary zip input.
//!
//! Run with: cargo +nightly fuzz run zip_open
//!
//! Opening malformed data must fail cleanly. When it opens, a transaction
//! that touches it must either commit or leave the file exactly as it was.

#![no_main]

use libfuzzer_sys::fuzz_target;

use arcedit::{UpdatableArchive, UpdateOptions, ZipFormat};

fuzz_target!(|data: &[u8]| {
    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let path = dir.path().join("fuzz.zip");
    if std::fs::write(&path, data).is_err() {
        return;
    }

    let options = UpdateOptions::new().staging_dir(dir.path()).sync(false);
    let Ok(mut archive) = UpdatableArchive::open_with(&path, ZipFormat::new(), options) else {
        return;
    };

    let first = archive.entries().first().map(|e| e.name.clone());
    if archive.begin().is_err() {
        return;
    }
    if let Some(name) = first {
        let _ = archive.delete(&name);
    }
    let _ = archive.write_entry("fuzz.txt", b"fuzz");

    if archive.end().is_err() {
        let after = std::fs::read(&path).unwrap_or_default();
        assert_eq!(after, data, "failed commit modified the archive");
    }
});
