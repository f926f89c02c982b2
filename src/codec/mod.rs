//! Archive codec boundary.
//!
//! The transaction engine never parses an archive format itself. It talks
//! to a codec through three traits:
//!
//! - [`ArchiveFormat`] opens an existing archive for reading and creates a
//!   new one for writing.
//! - [`ArchiveReader`] lists entries in archive order and streams their
//!   contents.
//! - [`ArchiveWriter`] appends entries to a new archive, either from a byte
//!   stream or by copying an original entry unchanged.
//!
//! Entry metadata is an opaque associated type. The engine only clones it
//! from a read entry and hands it back to the writer.
//!
//! # Supported Formats
//!
//! | Format | Feature | Type |
//! |--------|---------|------|
//! | Zip | `zip` | [`ZipFormat`] |
//! | Tar | `tar` | [`TarFormat`] |

use std::fmt;
use std::fs::File;
use std::io::Read;

use crate::{Error, Result};

#[cfg(feature = "zip")]
#[cfg_attr(docsrs, doc(cfg(feature = "zip")))]
pub mod zip;

#[cfg(feature = "tar")]
#[cfg_attr(docsrs, doc(cfg(feature = "tar")))]
pub mod tar;

#[cfg(feature = "zip")]
pub use self::zip::{ZipEntryMeta, ZipFormat, ZipReader, ZipWriter};

#[cfg(feature = "tar")]
pub use self::tar::{TarEntryMeta, TarFormat, TarReader, TarWriter};

/// One entry of an opened archive, as listed by [`ArchiveReader::entries`].
#[derive(Debug, Clone)]
pub struct EntryInfo<M> {
    /// Entry name exactly as stored in the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Format-specific metadata carried over on replacement.
    pub metadata: M,
}

/// An archive container format.
pub trait ArchiveFormat {
    /// Format-specific entry metadata.
    type Metadata: Clone + fmt::Debug;
    /// Reader over an existing archive.
    type Reader: ArchiveReader<Metadata = Self::Metadata>;
    /// Writer producing a new archive.
    type Writer: ArchiveWriter<Reader = Self::Reader>;

    /// Short format name used in log messages.
    fn name(&self) -> &'static str;

    /// Opens an existing archive.
    fn open(&self, file: File) -> Result<Self::Reader>;

    /// Starts a new, empty archive in `file`.
    fn create(&self, file: File) -> Result<Self::Writer>;
}

/// Read access to an existing archive.
pub trait ArchiveReader {
    /// Format-specific entry metadata.
    type Metadata: Clone + fmt::Debug;

    /// Returns all entries in archive order.
    fn entries(&self) -> &[EntryInfo<Self::Metadata>];

    /// Streams the uncompressed contents of the entry at `index`.
    fn read_entry_at(&mut self, index: usize) -> Result<Box<dyn Read + '_>>;

    /// Returns the index of the first entry named `name`.
    fn position(&self, name: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.name == name)
    }

    /// Streams the uncompressed contents of the entry named `name`.
    fn read_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        match self.position(name) {
            Some(index) => self.read_entry_at(index),
            None => Err(Error::EntryNotFound {
                name: name.to_string(),
            }),
        }
    }
}

/// Write access to a new archive.
pub trait ArchiveWriter: Sized {
    /// The reader type whose entries this writer can copy.
    type Reader: ArchiveReader;

    /// Appends an entry whose contents are read from `data`.
    ///
    /// `metadata` is the original entry's metadata when replacing, or `None`
    /// for a new entry, in which case the format's defaults apply. `size` is
    /// the exact number of bytes `data` yields. Returns the number of bytes
    /// written.
    fn write_entry(
        &mut self,
        name: &str,
        metadata: Option<&<Self::Reader as ArchiveReader>::Metadata>,
        data: &mut dyn Read,
        size: u64,
    ) -> Result<u64>;

    /// Appends the entry at `index` of `source` with its data and metadata
    /// unchanged.
    fn copy_entry(&mut self, source: &mut Self::Reader, index: usize) -> Result<()>;

    /// Carries archive-level metadata (such as a zip comment) over from
    /// `source`. Called once before any entry is written.
    fn inherit_archive_metadata(&mut self, source: &Self::Reader) -> Result<()> {
        let _ = source;
        Ok(())
    }

    /// Finalizes the archive and returns the underlying file.
    fn finish(self) -> Result<File>;
}
