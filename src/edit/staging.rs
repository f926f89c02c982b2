//! Temporary storage for staged entry payloads.
//!
//! Every payload lives in its own [`NamedTempFile`] until the rebuild has
//! copied it into the new archive. The area owns all of its files: a
//! [`StageHandle`] is only a key, so a handle can never outlive the storage
//! cleanup that [`StagingArea::release_all`] performs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Result};

const STAGE_PREFIX: &str = ".arcedit-";
const STAGE_SUFFIX: &str = ".stage";

/// Key of one staged payload.
///
/// Handles are allocated in increasing order, so comparing two handles
/// tells which payload was staged later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageHandle(u64);

/// Durable temporary storage for staged payloads.
#[derive(Debug)]
pub struct StagingArea {
    dir: Option<PathBuf>,
    files: BTreeMap<StageHandle, NamedTempFile>,
    next: u64,
}

impl StagingArea {
    /// Creates an empty staging area.
    ///
    /// Files are created in `dir`, or in the environment's temporary
    /// directory when `dir` is `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            files: BTreeMap::new(),
            next: 0,
        }
    }

    /// Returns the directory staging files are created in.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Allocates a new, empty staging file.
    pub fn allocate(&mut self) -> Result<StageHandle> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGE_PREFIX).suffix(STAGE_SUFFIX);
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::staging(self.dir.clone(), e))?;

        let handle = StageHandle(self.next);
        self.next += 1;
        log::trace!("staging: allocated {:?} at {}", handle, file.path().display());
        self.files.insert(handle, file);
        Ok(handle)
    }

    /// Returns a write sink appending to the staged payload.
    pub fn writer(&mut self, handle: StageHandle) -> Option<StagedWriter<'_>> {
        self.files.get_mut(&handle).map(|file| StagedWriter {
            file: file.as_file_mut(),
            written: 0,
        })
    }

    /// Opens an independent read handle positioned at the start of the
    /// staged payload.
    pub fn open_reader(&self, handle: StageHandle) -> Result<File> {
        let file = self.get(handle)?;
        file.reopen()
            .map_err(|e| Error::staging(Some(file.path().to_path_buf()), e))
    }

    /// Returns the current size of the staged payload.
    pub fn len(&self, handle: StageHandle) -> Result<u64> {
        let file = self.get(handle)?;
        file.as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::staging(Some(file.path().to_path_buf()), e))
    }

    /// Returns the path of the staged payload.
    pub fn path(&self, handle: StageHandle) -> Option<&Path> {
        self.files.get(&handle).map(|f| f.path())
    }

    /// Closes the staged payload and deletes its file.
    ///
    /// Releasing a handle that was already released does nothing.
    pub fn release(&mut self, handle: StageHandle) -> Result<()> {
        match self.files.remove(&handle) {
            Some(file) => close(file),
            None => Ok(()),
        }
    }

    /// Releases every outstanding payload.
    ///
    /// All files are attempted even if some fail; every failure is logged
    /// and the first one is returned.
    pub fn release_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for (handle, file) in std::mem::take(&mut self.files) {
            if let Err(e) = close(file) {
                log::warn!("staging: failed to release {:?}: {}", handle, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the number of payloads not yet released.
    pub fn outstanding(&self) -> usize {
        self.files.len()
    }

    fn get(&self, handle: StageHandle) -> Result<&NamedTempFile> {
        self.files.get(&handle).ok_or_else(|| {
            Error::staging(
                None,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("staging handle {:?} was already released", handle),
                ),
            )
        })
    }
}

fn close(file: NamedTempFile) -> Result<()> {
    let path = file.path().to_path_buf();
    file.close().map_err(|e| Error::staging(Some(path), e))
}

/// Write sink for a staged payload.
///
/// Writes go straight to the staging file. The sink mutably borrows the
/// staging area it came from. [`EntryWriter`](crate::EntryWriter) wraps it
/// for archive edits; wrap either in a [`std::io::BufWriter`] for many
/// small writes.
#[derive(Debug)]
pub struct StagedWriter<'a> {
    file: &'a mut File,
    written: u64,
}

impl StagedWriter<'_> {
    /// Returns the number of bytes written through this sink.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Write for StagedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
