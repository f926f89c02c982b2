//! Streaming rewrite of an archive with the ledger applied.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;

use super::ledger::{Action, EditLedger};
use super::staging::{StageHandle, StagingArea};
use crate::codec::{ArchiveReader, ArchiveWriter};
use crate::{Error, Result};

type MetadataOf<W> = <<W as ArchiveWriter>::Reader as ArchiveReader>::Metadata;

/// Counts of what a rebuild did with each entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Original entries copied unchanged.
    pub entries_kept: usize,
    /// Original entries written with staged content.
    pub entries_replaced: usize,
    /// Original entries dropped.
    pub entries_deleted: usize,
    /// Entries that did not exist in the original archive.
    pub entries_added: usize,
    /// Bytes of staged content written.
    pub bytes_staged: u64,
}

/// Writes `source` with the edits in `ledger` applied into `writer`.
///
/// Entries are streamed one at a time in original order: a staged
/// replacement is written under the original entry's metadata, a deleted
/// entry is skipped and every other entry is copied unchanged. Staged names
/// the original does not contain are appended afterwards with default
/// metadata, in staging order. Each staged payload is released as soon as
/// it has been written.
///
/// On return the ledger holds no replacements; its deletions are left for
/// the caller to clear. Any failure is reported as [`Error::Rebuild`] and
/// the output must be discarded.
pub fn rebuild<W: ArchiveWriter>(
    source: &mut W::Reader,
    mut writer: W,
    ledger: &mut EditLedger,
    staging: &mut StagingArea,
) -> Result<(File, RebuildStats)> {
    let mut stats = RebuildStats::default();
    let mut replaced = HashSet::new();

    writer
        .inherit_archive_metadata(source)
        .map_err(|e| Error::rebuild(None, e))?;

    for index in 0..source.entries().len() {
        let name = source.entries()[index].name.clone();

        if replaced.contains(&name) {
            log::trace!("rebuild: dropping duplicate of replaced entry '{}'", name);
            stats.entries_deleted += 1;
            continue;
        }

        match ledger.resolve(&name, true) {
            Action::UseStaged(handle) => {
                ledger.take_replacement(&name);
                let metadata = source.entries()[index].metadata.clone();
                let written = write_staged(&mut writer, staging, &name, Some(&metadata), handle)
                    .map_err(|e| Error::rebuild(Some(name.as_str()), e))?;
                log::trace!("rebuild: replaced '{}' ({} bytes)", name, written);
                stats.entries_replaced += 1;
                stats.bytes_staged += written;
                replaced.insert(name);
            }
            Action::Delete => {
                log::trace!("rebuild: deleted '{}'", name);
                stats.entries_deleted += 1;
            }
            Action::PassThrough => {
                writer
                    .copy_entry(source, index)
                    .map_err(|e| Error::rebuild(Some(name.as_str()), e))?;
                stats.entries_kept += 1;
            }
        }
    }

    for (name, handle) in ledger.take_remaining() {
        let written = write_staged(&mut writer, staging, &name, None, handle)
            .map_err(|e| Error::rebuild(Some(name.as_str()), e))?;
        log::trace!("rebuild: added '{}' ({} bytes)", name, written);
        stats.entries_added += 1;
        stats.bytes_staged += written;
    }

    let file = writer.finish().map_err(|e| Error::rebuild(None, e))?;
    Ok((file, stats))
}

fn write_staged<W: ArchiveWriter>(
    writer: &mut W,
    staging: &mut StagingArea,
    name: &str,
    metadata: Option<&MetadataOf<W>>,
    handle: StageHandle,
) -> Result<u64> {
    let size = staging.len(handle)?;
    let mut payload = BufReader::new(staging.open_reader(handle)?);
    let written = writer.write_entry(name, metadata, &mut payload, size)?;
    drop(payload);

    // The payload is in the new archive; a leftover file is only a leak.
    if let Err(e) = staging.release(handle) {
        log::warn!("rebuild: failed to release staged '{}': {}", name, e);
    }
    Ok(written)
}
