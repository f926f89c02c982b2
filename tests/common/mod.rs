//! Shared test utilities for integration tests.
//!
//! Archives are written and read back with the `zip` crate directly, so
//! assertions never depend on the code under test to decode its own output.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use arcedit::codec::{ZipReader, ZipWriter};
use arcedit::{
    ArchiveFormat, ArchiveWriter, Error, UpdatableArchive, UpdateOptions, ZipEntryMeta, ZipFormat,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// A scratch directory holding one archive and a private staging directory.
pub struct Workspace {
    pub dir: TempDir,
    pub archive: PathBuf,
    pub staging: PathBuf,
}

impl Workspace {
    /// Creates a workspace whose archive holds `entries`, in order.
    pub fn zip(entries: &[(&str, &[u8])]) -> Self {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("test.zip");
        let staging = dir.path().join("staging");
        fs::create_dir(&staging).unwrap();
        write_zip(&archive, entries);
        Self {
            dir,
            archive,
            staging,
        }
    }

    /// Options routing staged content into this workspace.
    pub fn options(&self) -> UpdateOptions {
        UpdateOptions::new().staging_dir(&self.staging).sync(false)
    }

    /// Opens the archive with [`Self::options`].
    pub fn open(&self) -> UpdatableArchive<ZipFormat> {
        UpdatableArchive::open_with(&self.archive, ZipFormat::new(), self.options()).unwrap()
    }

    /// Opens the archive through a format that fails on purpose.
    pub fn open_faulty(&self, fault: FaultyZip) -> UpdatableArchive<FaultyZip> {
        UpdatableArchive::open_with(&self.archive, fault, self.options()).unwrap()
    }

    /// Returns the raw bytes of the archive file.
    pub fn bytes(&self) -> Vec<u8> {
        fs::read(&self.archive).unwrap()
    }

    /// Returns `(name, data)` for every entry, in archive order.
    pub fn contents(&self) -> Vec<(String, Vec<u8>)> {
        read_zip(&self.archive)
    }

    /// Returns every entry name, in archive order.
    pub fn names(&self) -> Vec<String> {
        self.contents().into_iter().map(|(name, _)| name).collect()
    }

    /// Returns the number of files left in the staging directory.
    pub fn staged_files(&self) -> usize {
        fs::read_dir(&self.staging).unwrap().count()
    }

    /// Returns the sorted names of everything beside the archive.
    pub fn listing(&self) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Writes a deflate-compressed zip archive holding `entries`.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Reads every entry of a zip archive.
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| {
            let mut file = archive.by_index(index).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

/// Borrows owned contents as `(&str, &[u8])` pairs for comparison.
pub fn pairs(contents: &[(String, Vec<u8>)]) -> Vec<(&str, &[u8])> {
    contents
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect()
}

/// Zip format that injects codec failures during a rebuild.
#[derive(Debug, Clone, Default)]
pub struct FaultyZip {
    /// Fail when copying the original entry at this index unchanged.
    pub fail_copy_at: Option<usize>,
    /// Fail when writing staged content for this name.
    pub fail_write_of: Option<String>,
    /// Fail when finalizing the new archive.
    pub fail_finish: bool,
    /// Fail every open after the first one.
    pub fail_reopen: bool,
    opens: Rc<Cell<usize>>,
}

impl FaultyZip {
    pub fn copy_at(index: usize) -> Self {
        Self {
            fail_copy_at: Some(index),
            ..Self::default()
        }
    }

    pub fn write_of(name: &str) -> Self {
        Self {
            fail_write_of: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn finish() -> Self {
        Self {
            fail_finish: true,
            ..Self::default()
        }
    }

    pub fn reopen() -> Self {
        Self {
            fail_reopen: true,
            ..Self::default()
        }
    }
}

fn injected(what: &str) -> Error {
    Error::Io(io::Error::other(format!("injected {what} failure")))
}

impl ArchiveFormat for FaultyZip {
    type Metadata = ZipEntryMeta;
    type Reader = ZipReader;
    type Writer = FaultyWriter;

    fn name(&self) -> &'static str {
        "faulty-zip"
    }

    fn open(&self, file: File) -> arcedit::Result<ZipReader> {
        let opens = self.opens.get();
        self.opens.set(opens + 1);
        if self.fail_reopen && opens > 0 {
            return Err(injected("open"));
        }
        ZipFormat::new().open(file)
    }

    fn create(&self, file: File) -> arcedit::Result<FaultyWriter> {
        Ok(FaultyWriter {
            inner: ZipFormat::new().create(file)?,
            fault: self.clone(),
        })
    }
}

pub struct FaultyWriter {
    inner: ZipWriter,
    fault: FaultyZip,
}

impl ArchiveWriter for FaultyWriter {
    type Reader = ZipReader;

    fn write_entry(
        &mut self,
        name: &str,
        metadata: Option<&ZipEntryMeta>,
        data: &mut dyn Read,
        size: u64,
    ) -> arcedit::Result<u64> {
        if self.fault.fail_write_of.as_deref() == Some(name) {
            return Err(injected("write"));
        }
        self.inner.write_entry(name, metadata, data, size)
    }

    fn copy_entry(&mut self, source: &mut ZipReader, index: usize) -> arcedit::Result<()> {
        if self.fault.fail_copy_at == Some(index) {
            return Err(injected("read"));
        }
        self.inner.copy_entry(source, index)
    }

    fn inherit_archive_metadata(&mut self, source: &ZipReader) -> arcedit::Result<()> {
        self.inner.inherit_archive_metadata(source)
    }

    fn finish(self) -> arcedit::Result<File> {
        if self.fault.fail_finish {
            return Err(injected("finish"));
        }
        self.inner.finish()
    }
}
