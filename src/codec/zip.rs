//! Zip backend built on the `zip` crate.
//!
//! Untouched entries are copied with `zip::ZipWriter::raw_copy_file`, so
//! their compressed bytes, CRC, timestamps and attributes are carried over
//! without decompressing. Replaced entries are recompressed with the
//! original entry's method, timestamp and permissions, and keep its extra
//! field records. Per-entry comments and external attributes other than
//! Unix mode bits cannot be written by `zip` and are lost on replacement.

use std::fs::File;
use std::io::{self, Read};

use ::zip::write::FullFileOptions;
use ::zip::{CompressionMethod, DateTime};

use super::{ArchiveFormat, ArchiveReader, ArchiveWriter, EntryInfo};
use crate::{Error, Result};

/// Metadata of a zip entry that is preserved when the entry is replaced.
#[derive(Debug, Clone)]
pub struct ZipEntryMeta {
    /// Compression method of the original entry.
    pub compression: CompressionMethod,
    /// Last modification time, if the entry records a valid one.
    pub last_modified: Option<DateTime>,
    /// Unix mode bits, if the entry was created on a Unix host.
    pub unix_mode: Option<u32>,
    /// Raw extra field records of the entry.
    pub extra_data: Vec<u8>,
}

/// Extra field ids the `zip` crate writes itself.
const MANAGED_EXTRA_FIELDS: &[u16] = &[
    0x0001, // Zip64 sizes
    0x9901, // AES encryption
];

/// Splits raw extra field data into `(header id, payload)` records.
///
/// A truncated trailing record is ignored.
fn extra_field_records(mut data: &[u8]) -> Vec<(u16, &[u8])> {
    let mut records = Vec::new();
    while data.len() >= 4 {
        let id = u16::from_le_bytes([data[0], data[1]]);
        let len = usize::from(u16::from_le_bytes([data[2], data[3]]));
        let Some(payload) = data.get(4..4 + len) else {
            break;
        };
        records.push((id, payload));
        data = &data[4 + len..];
    }
    records
}

/// The zip archive format.
///
/// # Example
///
/// ```rust
/// use arcedit::ZipFormat;
/// use zip::CompressionMethod;
///
/// // Store new entries uncompressed
/// let format = ZipFormat::new().compression(CompressionMethod::Stored);
/// ```
#[derive(Debug, Clone)]
pub struct ZipFormat {
    compression: CompressionMethod,
    level: Option<i64>,
}

impl Default for ZipFormat {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
            level: None,
        }
    }
}

impl ZipFormat {
    /// Creates a zip format with deflate compression for new entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression method for newly added entries.
    ///
    /// Replaced entries keep the method of the entry they replace.
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Sets the compression level for newly added entries.
    pub fn compression_level(mut self, level: Option<i64>) -> Self {
        self.level = level;
        self
    }
}

impl ArchiveFormat for ZipFormat {
    type Metadata = ZipEntryMeta;
    type Reader = ZipReader;
    type Writer = ZipWriter;

    fn name(&self) -> &'static str {
        "zip"
    }

    fn open(&self, file: File) -> Result<ZipReader> {
        ZipReader::new(file)
    }

    fn create(&self, file: File) -> Result<ZipWriter> {
        Ok(ZipWriter {
            inner: ::zip::ZipWriter::new(file),
            format: self.clone(),
        })
    }
}

/// Reader over an existing zip archive.
pub struct ZipReader {
    archive: ::zip::ZipArchive<File>,
    entries: Vec<EntryInfo<ZipEntryMeta>>,
}

impl ZipReader {
    fn new(file: File) -> Result<Self> {
        let mut archive = ::zip::ZipArchive::new(file)?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            entries.push(EntryInfo {
                name: file.name().to_string(),
                size: file.size(),
                is_directory: file.is_dir(),
                metadata: ZipEntryMeta {
                    compression: file.compression(),
                    last_modified: file.last_modified(),
                    unix_mode: file.unix_mode(),
                    extra_data: file.extra_data().map(<[u8]>::to_vec).unwrap_or_default(),
                },
            });
        }

        Ok(Self { archive, entries })
    }

    /// Returns the archive comment.
    pub fn comment(&self) -> &[u8] {
        self.archive.comment()
    }
}

impl ArchiveReader for ZipReader {
    type Metadata = ZipEntryMeta;

    fn entries(&self) -> &[EntryInfo<ZipEntryMeta>] {
        &self.entries
    }

    fn read_entry_at(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let file = self.archive.by_index(index)?;
        Ok(Box::new(file))
    }
}

/// Writer producing a new zip archive.
pub struct ZipWriter {
    inner: ::zip::ZipWriter<File>,
    format: ZipFormat,
}

impl ZipWriter {
    fn options_for(&self, metadata: Option<&ZipEntryMeta>, size: u64) -> FullFileOptions<'static> {
        // Default options carry the current time as modification time
        let options = FullFileOptions::default().large_file(size >= u64::from(u32::MAX));

        match metadata {
            Some(meta) => {
                let mut options = if is_writable(meta.compression) {
                    options.compression_method(meta.compression)
                } else {
                    log::debug!(
                        "zip: cannot write {:?}, recompressing with {:?}",
                        meta.compression,
                        self.format.compression
                    );
                    options
                        .compression_method(self.format.compression)
                        .compression_level(self.format.level)
                };
                if let Some(modified) = meta.last_modified {
                    options = options.last_modified_time(modified);
                }
                if let Some(mode) = meta.unix_mode {
                    options = options.unix_permissions(mode);
                }
                for (id, payload) in extra_field_records(&meta.extra_data) {
                    if MANAGED_EXTRA_FIELDS.contains(&id) {
                        continue;
                    }
                    if let Err(e) = options.add_extra_data(id, Box::<[u8]>::from(payload), false) {
                        log::debug!("zip: dropping extra field {:#06x}: {}", id, e);
                    }
                }
                options
            }
            None => options
                .compression_method(self.format.compression)
                .compression_level(self.format.level),
        }
    }
}

fn is_writable(method: CompressionMethod) -> bool {
    match method {
        CompressionMethod::Stored | CompressionMethod::Deflated => true,
        #[cfg(feature = "bzip2")]
        CompressionMethod::Bzip2 => true,
        #[cfg(feature = "zstd")]
        CompressionMethod::Zstd => true,
        _ => false,
    }
}

impl ArchiveWriter for ZipWriter {
    type Reader = ZipReader;

    fn write_entry(
        &mut self,
        name: &str,
        metadata: Option<&ZipEntryMeta>,
        data: &mut dyn Read,
        size: u64,
    ) -> Result<u64> {
        let options = self.options_for(metadata, size);
        self.inner.start_file(name, options)?;
        let written = io::copy(data, &mut self.inner)?;
        Ok(written)
    }

    fn copy_entry(&mut self, source: &mut ZipReader, index: usize) -> Result<()> {
        let file = source.archive.by_index_raw(index)?;
        self.inner.raw_copy_file(file)?;
        Ok(())
    }

    fn inherit_archive_metadata(&mut self, source: &ZipReader) -> Result<()> {
        let comment = source.comment();
        if !comment.is_empty() {
            self.inner.set_raw_comment(comment.into());
        }
        Ok(())
    }

    fn finish(self) -> Result<File> {
        self.inner.finish().map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::zip::write::SimpleFileOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_sample(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sample.zip");
        let mut writer = ::zip::ZipWriter::new(File::create(&path).unwrap());
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o600);
        writer.start_file("stored.txt", stored).unwrap();
        writer.write_all(b"stored data").unwrap();
        writer
            .start_file("deflated.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"deflated data").unwrap();
        writer
            .add_directory("dir/", SimpleFileOptions::default())
            .unwrap();
        writer.set_comment("sample comment");
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_reader_lists_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);

        let reader = ZipFormat::new().open(File::open(&path).unwrap()).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["stored.txt", "deflated.txt", "dir/"]);

        let stored = &reader.entries()[0];
        assert_eq!(stored.size, 11);
        assert!(!stored.is_directory);
        assert_eq!(stored.metadata.compression, CompressionMethod::Stored);
        assert!(reader.entries()[2].is_directory);
        assert_eq!(reader.comment(), b"sample comment");
    }

    #[test]
    fn test_read_entry_by_name() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);

        let mut reader = ZipFormat::new().open(File::open(&path).unwrap()).unwrap();
        let mut data = Vec::new();
        reader
            .read_entry("deflated.txt")
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"deflated data");

        assert!(matches!(
            reader.read_entry("missing.txt"),
            Err(Error::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_copy_and_replace_preserve_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);
        let out_path = dir.path().join("out.zip");

        let format = ZipFormat::new();
        let mut reader = format.open(File::open(&path).unwrap()).unwrap();
        let mut writer = format.create(File::create(&out_path).unwrap()).unwrap();
        writer.inherit_archive_metadata(&reader).unwrap();

        let meta = reader.entries()[0].metadata.clone();
        let mut payload: &[u8] = b"replaced";
        writer
            .write_entry("stored.txt", Some(&meta), &mut payload, 8)
            .unwrap();
        writer.copy_entry(&mut reader, 1).unwrap();
        writer.finish().unwrap();

        let mut out = format.open(File::open(&out_path).unwrap()).unwrap();
        assert_eq!(out.entries().len(), 2);
        let replaced = &out.entries()[0];
        assert_eq!(replaced.metadata.compression, CompressionMethod::Stored);
        assert_eq!(
            replaced.metadata.unix_mode.map(|m| m & 0o777),
            Some(0o600)
        );
        assert_eq!(out.comment(), b"sample comment");

        let mut data = Vec::new();
        out.read_entry_at(1).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"deflated data");
    }

    #[test]
    fn test_new_entry_uses_format_defaults() {
        let dir = TempDir::new().unwrap();
        let out_path = dir.path().join("new.zip");

        let format = ZipFormat::new().compression(CompressionMethod::Stored);
        let mut writer = format.create(File::create(&out_path).unwrap()).unwrap();
        let mut payload: &[u8] = b"fresh";
        let written = writer.write_entry("new.txt", None, &mut payload, 5).unwrap();
        assert_eq!(written, 5);
        writer.finish().unwrap();

        let reader = format.open(File::open(&out_path).unwrap()).unwrap();
        let meta = &reader.entries()[0].metadata;
        assert_eq!(meta.compression, CompressionMethod::Stored);
        // Stamped with the current time, not the 1980 zip epoch
        let modified = meta.last_modified.unwrap();
        assert!(modified.year() >= 2024, "unexpected mtime {modified:?}");
    }

    #[test]
    fn test_extra_field_records() {
        let data = [0xFE, 0xCA, 2, 0, 7, 8, 0x55, 0x54, 1, 0, 3, 0x01, 0x00, 9];
        assert_eq!(
            extra_field_records(&data),
            [(0xCAFE, &[7u8, 8][..]), (0x5455, &[3u8][..])]
        );
        assert!(extra_field_records(&[0xFE, 0xCA, 9, 0, 1]).is_empty());
    }

    #[test]
    fn test_replace_keeps_extra_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("extra.zip");
        let mut writer = ::zip::ZipWriter::new(File::create(&path).unwrap());
        let mut options = FullFileOptions::default();
        options
            .add_extra_data(0xCAFE, Box::<[u8]>::from(&[1u8, 2, 3, 4][..]), false)
            .unwrap();
        writer.start_file("tagged.txt", options).unwrap();
        writer.write_all(b"old").unwrap();
        writer.finish().unwrap();

        let format = ZipFormat::new();
        let reader = format.open(File::open(&path).unwrap()).unwrap();
        let meta = reader.entries()[0].metadata.clone();
        assert!(extra_field_records(&meta.extra_data).contains(&(0xCAFE, &[1u8, 2, 3, 4][..])));

        let out_path = dir.path().join("out.zip");
        let mut writer = format.create(File::create(&out_path).unwrap()).unwrap();
        let mut payload: &[u8] = b"new";
        writer
            .write_entry("tagged.txt", Some(&meta), &mut payload, 3)
            .unwrap();
        writer.finish().unwrap();

        let out = format.open(File::open(&out_path).unwrap()).unwrap();
        let extra = &out.entries()[0].metadata.extra_data;
        assert!(extra_field_records(extra).contains(&(0xCAFE, &[1u8, 2, 3, 4][..])));
    }
}
