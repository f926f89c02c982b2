//! Tar backend built on the `tar` crate.
//!
//! Entry data is located once when the archive is opened, so reading an
//! entry seeks straight to its data instead of rescanning the archive.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ::tar::{Builder, EntryType, Header};

use super::{ArchiveFormat, ArchiveReader, ArchiveWriter, EntryInfo};
use crate::{Error, Result};

/// Metadata of a tar entry that is preserved when the entry is replaced.
#[derive(Debug, Clone)]
pub struct TarEntryMeta {
    /// The entry's header block. Size and checksum are rewritten on output.
    pub header: Header,
    /// Link target for symlink and hard link entries.
    pub link_name: Option<PathBuf>,
}

/// The tar archive format.
#[derive(Debug, Clone)]
pub struct TarFormat {
    mode: u32,
}

impl Default for TarFormat {
    fn default() -> Self {
        Self { mode: 0o644 }
    }
}

impl TarFormat {
    /// Creates a tar format whose added entries get mode `0o644`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the permission bits for newly added entries.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

impl ArchiveFormat for TarFormat {
    type Metadata = TarEntryMeta;
    type Reader = TarReader;
    type Writer = TarWriter;

    fn name(&self) -> &'static str {
        "tar"
    }

    fn open(&self, file: File) -> Result<TarReader> {
        TarReader::new(file)
    }

    fn create(&self, file: File) -> Result<TarWriter> {
        Ok(TarWriter {
            builder: Builder::new(file),
            mode: self.mode,
        })
    }
}

/// Reader over an existing tar archive.
pub struct TarReader {
    file: File,
    entries: Vec<EntryInfo<TarEntryMeta>>,
    data_offsets: Vec<u64>,
}

impl TarReader {
    fn new(file: File) -> Result<Self> {
        let mut archive = ::tar::Archive::new(file);
        let mut entries = Vec::new();
        let mut data_offsets = Vec::new();

        for entry in archive.entries()? {
            let entry = entry?;
            let header = entry.header().clone();
            let link_name = entry.link_name()?.map(|p| p.into_owned());
            entries.push(EntryInfo {
                name: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
                size: entry.size(),
                is_directory: header.entry_type().is_dir(),
                metadata: TarEntryMeta { header, link_name },
            });
            data_offsets.push(entry.raw_file_position());
        }

        Ok(Self {
            file: archive.into_inner(),
            entries,
            data_offsets,
        })
    }
}

impl ArchiveReader for TarReader {
    type Metadata = TarEntryMeta;

    fn entries(&self) -> &[EntryInfo<TarEntryMeta>] {
        &self.entries
    }

    fn read_entry_at(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let (Some(offset), Some(entry)) = (self.data_offsets.get(index), self.entries.get(index))
        else {
            return Err(Error::EntryNotFound {
                name: format!("#{index}"),
            });
        };
        self.file.seek(SeekFrom::Start(*offset))?;
        Ok(Box::new((&mut self.file).take(entry.size)))
    }
}

/// Writer producing a new tar archive.
pub struct TarWriter {
    builder: Builder<File>,
    mode: u32,
}

impl TarWriter {
    fn append(&mut self, name: &str, meta: &TarEntryMeta, data: &mut dyn Read, size: u64) -> Result<()> {
        let mut header = meta.header.clone();
        let entry_type = header.entry_type();
        match &meta.link_name {
            Some(target) if entry_type.is_symlink() || entry_type.is_hard_link() => {
                header.set_size(0);
                self.builder.append_link(&mut header, name, target)?;
            }
            _ => {
                header.set_size(size);
                self.builder.append_data(&mut header, name, data)?;
            }
        }
        Ok(())
    }

    fn default_meta(&self) -> TarEntryMeta {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(self.mode);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        TarEntryMeta {
            header,
            link_name: None,
        }
    }
}

impl ArchiveWriter for TarWriter {
    type Reader = TarReader;

    fn write_entry(
        &mut self,
        name: &str,
        metadata: Option<&TarEntryMeta>,
        data: &mut dyn Read,
        size: u64,
    ) -> Result<u64> {
        // Staged content replaces whatever the entry was with a regular file.
        let meta = match metadata {
            Some(meta) => {
                let mut meta = meta.clone();
                meta.header.set_entry_type(EntryType::Regular);
                meta.link_name = None;
                meta
            }
            None => self.default_meta(),
        };
        self.append(name, &meta, data, size)?;
        Ok(size)
    }

    fn copy_entry(&mut self, source: &mut TarReader, index: usize) -> Result<()> {
        let Some(info) = source.entries.get(index) else {
            return Err(Error::EntryNotFound {
                name: format!("#{index}"),
            });
        };
        let name = info.name.clone();
        let meta = info.metadata.clone();
        let size = info.size;
        let mut data = source.read_entry_at(index)?;
        self.append(&name, &meta, &mut data, size)
    }

    fn finish(self) -> Result<File> {
        Ok(self.builder.into_inner()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sample(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sample.tar");
        let mut builder = Builder::new(File::create(&path).unwrap());
        for (name, data, mode) in [("a.txt", &b"alpha"[..], 0o600), ("b.txt", &b"beta"[..], 0o755)] {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(mode);
            header.set_mtime(1_700_000_000);
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap();
        path
    }

    #[test]
    fn test_reader_locates_entry_data() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);

        let mut reader = TarFormat::new().open(File::open(&path).unwrap()).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);

        // Read out of order to exercise seeking
        let mut data = String::new();
        reader.read_entry("b.txt").unwrap().read_to_string(&mut data).unwrap();
        assert_eq!(data, "beta");
        data.clear();
        reader.read_entry_at(0).unwrap().read_to_string(&mut data).unwrap();
        assert_eq!(data, "alpha");
    }

    #[test]
    fn test_replace_keeps_header_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir);
        let out_path = dir.path().join("out.tar");

        let format = TarFormat::new();
        let mut reader = format.open(File::open(&path).unwrap()).unwrap();
        let mut writer = format.create(File::create(&out_path).unwrap()).unwrap();

        let meta = reader.entries()[0].metadata.clone();
        let mut payload: &[u8] = b"ALPHA!";
        writer.write_entry("a.txt", Some(&meta), &mut payload, 6).unwrap();
        writer.copy_entry(&mut reader, 1).unwrap();
        writer.finish().unwrap();

        let mut out = format.open(File::open(&out_path).unwrap()).unwrap();
        let first = &out.entries()[0];
        assert_eq!(first.size, 6);
        assert_eq!(first.metadata.header.mode().unwrap(), 0o600);
        assert_eq!(first.metadata.header.mtime().unwrap(), 1_700_000_000);
        assert_eq!(out.entries()[1].metadata.header.mode().unwrap(), 0o755);

        let mut data = Vec::new();
        out.read_entry_at(0).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"ALPHA!");
    }

    #[test]
    fn test_new_entry_defaults() {
        let dir = TempDir::new().unwrap();
        let out_path = dir.path().join("new.tar");

        let format = TarFormat::new().mode(0o640);
        let mut writer = format.create(File::create(&out_path).unwrap()).unwrap();
        let mut payload: &[u8] = b"new";
        writer.write_entry("dir/new.txt", None, &mut payload, 3).unwrap();
        writer.finish().unwrap();

        let reader = format.open(File::open(&out_path).unwrap()).unwrap();
        let entry = &reader.entries()[0];
        assert_eq!(entry.name, "dir/new.txt");
        assert_eq!(entry.metadata.header.mode().unwrap(), 0o640);
        assert_eq!(entry.metadata.header.entry_type(), EntryType::Regular);
    }

    #[test]
    fn test_empty_file_opens_as_empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tar");
        File::create(&path).unwrap();

        let reader = TarFormat::new().open(File::open(&path).unwrap()).unwrap();
        assert!(reader.entries().is_empty());
    }
}
