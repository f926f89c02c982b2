//! Transaction boundary and atomic commit.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::ledger::EditLedger;
use super::rebuild::{RebuildStats, rebuild};
use super::staging::{StageHandle, StagedWriter, StagingArea};
use crate::codec::{ArchiveFormat, ArchiveReader, ArchiveWriter, EntryInfo};
use crate::{EntryName, Error, Result, UpdateOptions};

/// Lifecycle state of the transaction on an [`UpdatableArchive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction; edits of existing entries are rejected.
    Closed,
    /// A transaction is open and accepts edits.
    Open,
    /// The archive is being rewritten by [`UpdatableArchive::end`].
    Rebuilding,
}

/// Result of ending a transaction.
#[must_use = "commit summary should be checked to verify the commit did what was expected"]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Whether the archive was rewritten. False for a transaction without
    /// pending edits, in which case the archive file was not touched.
    pub rebuilt: bool,
    /// Number of original entries carried over unchanged.
    pub entries_kept: usize,
    /// Number of original entries replaced with staged content.
    pub entries_replaced: usize,
    /// Number of original entries deleted.
    pub entries_deleted: usize,
    /// Number of new entries added.
    pub entries_added: usize,
    /// Bytes of staged content written into the archive.
    pub bytes_staged: u64,
}

impl CommitSummary {
    fn unchanged(entries: usize) -> Self {
        Self {
            entries_kept: entries,
            ..Default::default()
        }
    }

    /// Returns the total number of entries in the resulting archive.
    pub fn total_entries(&self) -> usize {
        self.entries_kept + self.entries_replaced + self.entries_added
    }
}

impl From<RebuildStats> for CommitSummary {
    fn from(stats: RebuildStats) -> Self {
        Self {
            rebuilt: true,
            entries_kept: stats.entries_kept,
            entries_replaced: stats.entries_replaced,
            entries_deleted: stats.entries_deleted,
            entries_added: stats.entries_added,
            bytes_staged: stats.bytes_staged,
        }
    }
}

/// An archive that can be edited in place through transactions.
///
/// Edits are staged between [`begin`](Self::begin) and [`end`](Self::end).
/// Ending the transaction rewrites the archive into a temporary file next to
/// it and renames that file over the original, so other readers of the path
/// see either the old archive or the complete new one. If the rewrite fails
/// the original is left untouched. Staged content is always cleaned up,
/// including when the archive is dropped with a transaction still open.
///
/// One transaction can be open at a time. The archive does not lock its
/// file: callers that share the path between processes must serialize
/// access themselves, for example with a file lock held across the whole
/// transaction.
///
/// # Example
///
/// ```rust,no_run
/// use std::io::Write;
/// use arcedit::{UpdatableArchive, ZipFormat};
///
/// let mut archive = UpdatableArchive::<ZipFormat>::open("bundle.zip")?;
/// archive.begin()?;
/// archive.delete("obsolete.txt")?;
/// archive.open_for_write("config.json")?.write_all(b"{}")?;
/// let summary = archive.end()?;
/// assert!(summary.rebuilt);
/// # Ok::<(), arcedit::Error>(())
/// ```
pub struct UpdatableArchive<F: ArchiveFormat> {
    path: PathBuf,
    format: F,
    options: UpdateOptions,
    reader: Option<F::Reader>,
    state: TransactionState,
    ledger: EditLedger,
    staging: StagingArea,
}

impl<F: ArchiveFormat + Default> UpdatableArchive<F> {
    /// Opens an existing archive with default format settings and options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, F::default(), UpdateOptions::default())
    }

    /// Creates an empty archive at `path`, truncating any existing file,
    /// and opens it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, F::default(), UpdateOptions::default())
    }

    /// Opens an existing archive and immediately begins a transaction.
    pub fn begin_transaction(path: impl AsRef<Path>) -> Result<Self> {
        let mut archive = Self::open(path)?;
        archive.begin()?;
        Ok(archive)
    }
}

impl<F: ArchiveFormat> UpdatableArchive<F> {
    /// Opens an existing archive.
    pub fn open_with(path: impl AsRef<Path>, format: F, options: UpdateOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = format.open(File::open(&path)?)?;
        log::debug!(
            "opened {} archive {} ({} entries)",
            format.name(),
            path.display(),
            reader.entries().len()
        );

        Ok(Self {
            staging: StagingArea::new(options.staging_dir.clone()),
            path,
            format,
            options,
            reader: Some(reader),
            state: TransactionState::Closed,
            ledger: EditLedger::new(),
        })
    }

    /// Creates an empty archive at `path`, truncating any existing file,
    /// and opens it.
    pub fn create_with(path: impl AsRef<Path>, format: F, options: UpdateOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = format.create(File::create(path)?)?.finish()?;
        if options.sync {
            file.sync_all()?;
        }
        drop(file);
        Self::open_with(path, format, options)
    }

    /// Returns the path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the archive format.
    pub fn format(&self) -> &F {
        &self.format
    }

    /// Returns the options this archive was opened with.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Returns the current transaction state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while a transaction is open and accepts edits.
    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Returns true if the open transaction has staged edits.
    pub fn has_pending_changes(&self) -> bool {
        self.ledger.has_pending_changes()
    }

    /// Returns the number of staged replacements and additions.
    pub fn pending_writes(&self) -> usize {
        self.ledger.replacement_count()
    }

    /// Returns the number of staged deletions.
    pub fn pending_deletions(&self) -> usize {
        self.ledger.deletion_count()
    }

    /// Returns the entries of the archive as it is on disk, ignoring any
    /// staged edits.
    pub fn entries(&self) -> &[EntryInfo<F::Metadata>] {
        self.reader.as_ref().map_or(&[], |r| r.entries())
    }

    /// Returns the entry names of the archive as it is on disk.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries().iter().map(|e| e.name.as_str())
    }

    /// Returns true if the archive on disk contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries().iter().any(|e| e.name == name)
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyOpen`] if a transaction is already open.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TransactionState::Closed {
            return Err(Error::AlreadyOpen);
        }
        self.ledger.clear();
        self.staging = StagingArea::new(self.options.staging_dir.clone());
        self.state = TransactionState::Open;
        log::debug!("began transaction on {}", self.path.display());
        Ok(())
    }

    /// Begins a transaction that is discarded unless committed.
    ///
    /// The returned guard gives access to the archive. Call
    /// [`TransactionGuard::commit`] to end the transaction; dropping the
    /// guard without committing, including while unwinding from a panic,
    /// aborts it.
    pub fn begin_scoped(&mut self) -> Result<TransactionGuard<'_, F>> {
        self.begin()?;
        Ok(TransactionGuard { archive: self })
    }

    /// Runs `edit` inside a transaction.
    ///
    /// The transaction is committed if `edit` returns `Ok` and aborted if it
    /// returns `Err` or panics.
    ///
    /// ```rust,no_run
    /// use arcedit::{UpdatableArchive, ZipFormat};
    ///
    /// let mut archive = UpdatableArchive::<ZipFormat>::open("bundle.zip")?;
    /// let ((), summary) = archive.transaction(|archive| {
    ///     archive.write_entry("version.txt", "2")?;
    ///     archive.delete("old-version.txt")
    /// })?;
    /// # Ok::<(), arcedit::Error>(())
    /// ```
    pub fn transaction<T, E>(
        &mut self,
        edit: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<(T, CommitSummary), E>
    where
        E: From<Error>,
    {
        let mut guard = self.begin_scoped()?;
        let value = edit(&mut *guard)?;
        let summary = guard.commit()?;
        Ok((value, summary))
    }

    /// Stages new content for `name` and returns a sink to write it to.
    ///
    /// If `name` exists in the archive its content is replaced; otherwise a
    /// new entry is added. Staging the same name again discards the earlier
    /// content, so the last write wins.
    ///
    /// Outside a transaction a new name is still accepted: the sink then
    /// runs its own single-entry transaction, committed by
    /// [`EntryWriter::finish`] or when the sink is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEntryName`] if `name` is not a safe relative path
    /// - [`Error::TransactionClosed`] if no transaction is open and the
    ///   archive contains `name`
    /// - [`Error::StagingIo`] if staging storage cannot be allocated
    /// - [`Error::Io`] if the archive could not be reopened after an
    ///   earlier commit
    pub fn open_for_write(&mut self, name: &str) -> Result<EntryWriter<'_, F>> {
        let name = EntryName::new(name)?;
        let exists = self.reader()?.position(name.as_str()).is_some();

        let implicit = self.state != TransactionState::Open;
        if implicit {
            if exists {
                return Err(Error::TransactionClosed {
                    name: name.into_string(),
                });
            }
            self.begin()?;
            log::debug!("implicit transaction for new entry '{}'", name);
        }

        let handle = match self.stage(&name, exists) {
            Ok(handle) => handle,
            Err(e) => {
                if implicit {
                    if let Err(cleanup) = self.abort() {
                        log::warn!("staging cleanup failed after failed write: {}", cleanup);
                    }
                }
                return Err(e);
            }
        };

        Ok(EntryWriter {
            archive: self,
            name: name.into_string(),
            handle,
            written: 0,
            implicit,
        })
    }

    fn stage(&mut self, name: &EntryName, exists: bool) -> Result<StageHandle> {
        if let Some(previous) = self.ledger.take_replacement(name.as_str()) {
            log::debug!("discarding earlier staged content for '{}'", name);
            self.staging.release(previous)?;
        }

        let handle = self.staging.allocate()?;
        if exists {
            log::debug!("staged replacement of '{}'", name);
        } else {
            log::debug!("staged addition of '{}'", name);
        }
        self.ledger.stage_replacement(name.as_str().to_string(), handle);
        Ok(handle)
    }

    /// Stages `data` as the new content of `name`.
    ///
    /// Shorthand for [`open_for_write`](Self::open_for_write) followed by a
    /// single write. Outside a transaction a new entry is committed before
    /// this returns.
    pub fn write_entry(&mut self, name: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let mut sink = self.open_for_write(name)?;
        if let Err(e) = sink.write_all(data.as_ref()) {
            if let Err(cleanup) = sink.discard() {
                log::warn!("staging cleanup failed after failed write: {}", cleanup);
            }
            return Err(Error::staging(None, e));
        }
        sink.finish()?;
        Ok(())
    }

    /// Marks `name` for deletion.
    ///
    /// Deleting a name more than once, or a name the archive does not
    /// contain, has no further effect. Content staged for the same name in
    /// this transaction takes precedence over the deletion.
    ///
    /// # Errors
    ///
    /// - [`Error::TransactionClosed`] if no transaction is open and the
    ///   archive contains `name`
    /// - [`Error::Io`] if the archive could not be reopened after an
    ///   earlier commit
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let exists = self.reader()?.position(name).is_some();
        if self.state != TransactionState::Open {
            if exists {
                return Err(Error::TransactionClosed {
                    name: name.to_string(),
                });
            }
            return Ok(());
        }

        if self.ledger.mark_deleted(name) {
            log::debug!("staged deletion of '{}'", name);
        }
        Ok(())
    }

    /// Opens `name` for reading as the open transaction currently sees it.
    ///
    /// Staged content is returned if there is any, including content still
    /// being written. Entries marked for deletion are not readable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] if there is no such entry.
    pub fn open_for_read(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        if let Some(handle) = self.ledger.staged(name) {
            return Ok(Box::new(self.staging.open_reader(handle)?));
        }
        if self.ledger.is_deleted(name) {
            return Err(Error::EntryNotFound {
                name: name.to_string(),
            });
        }
        self.reader_mut()?.read_entry(name)
    }

    /// Reads `name` into memory. See [`open_for_read`](Self::open_for_read).
    pub fn read_to_vec(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open_for_read(name)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Ends the open transaction, committing its edits.
    ///
    /// Without pending edits the archive file is left untouched. Otherwise
    /// the archive is rebuilt and atomically swapped into place. Staged
    /// content is released whether or not the commit succeeds, and the
    /// transaction is closed either way.
    ///
    /// # Errors
    ///
    /// - [`Error::NoTransaction`] if no transaction is open
    /// - [`Error::Rebuild`] if the rewrite failed; the original is unchanged
    /// - [`Error::Io`] if the rebuilt archive could not be swapped in
    pub fn end(&mut self) -> Result<CommitSummary> {
        if self.state != TransactionState::Open {
            return Err(Error::NoTransaction);
        }

        let outcome = if self.ledger.has_pending_changes() {
            self.state = TransactionState::Rebuilding;
            self.commit_changes()
        } else {
            log::debug!("no pending changes for {}", self.path.display());
            Ok(CommitSummary::unchanged(self.entries().len()))
        };

        let cleanup = self.teardown();
        match (outcome, cleanup) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(summary), Err(e)) => {
                log::warn!("committed {} but staging cleanup failed: {}", self.path.display(), e);
                Ok(summary)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                log::warn!("staging cleanup failed after aborted commit: {}", cleanup);
                Err(e)
            }
        }
    }

    /// Discards the open transaction and all staged content.
    ///
    /// Does nothing if no transaction is open.
    pub fn abort(&mut self) -> Result<()> {
        if self.state == TransactionState::Closed {
            return Ok(());
        }
        log::debug!("aborting transaction on {}", self.path.display());
        self.teardown()
    }

    /// Closes the archive, discarding any open transaction.
    pub fn close(mut self) -> Result<()> {
        self.abort()
    }

    fn teardown(&mut self) -> Result<()> {
        self.ledger.clear();
        let released = self.staging.release_all();
        self.state = TransactionState::Closed;
        released
    }

    fn reader(&self) -> Result<&F::Reader> {
        self.reader.as_ref().ok_or_else(|| not_reopened(&self.path))
    }

    fn reader_mut(&mut self) -> Result<&mut F::Reader> {
        self.reader.as_mut().ok_or_else(|| not_reopened(&self.path))
    }

    fn commit_changes(&mut self) -> Result<CommitSummary> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "archive".into(), |n| n.to_string_lossy().into_owned());

        // Same directory as the original so the rename cannot cross volumes.
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        let output = temp.as_file().try_clone()?;

        log::debug!(
            "rebuilding {} ({} writes, {} deletions) via {}",
            self.path.display(),
            self.ledger.replacement_count(),
            self.ledger.deletion_count(),
            temp.path().display()
        );

        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::rebuild(
                None,
                Error::Io(io::Error::new(io::ErrorKind::NotFound, "archive is not open")),
            ));
        };
        let writer = self
            .format
            .create(output)
            .map_err(|e| Error::rebuild(None, e))?;
        let (file, stats) = rebuild(reader, writer, &mut self.ledger, &mut self.staging)?;

        if self.options.sync {
            file.sync_all().map_err(|e| Error::rebuild(None, e.into()))?;
        }
        drop(file);

        if self.options.preserve_permissions {
            let permissions = fs::metadata(&self.path)?.permissions();
            fs::set_permissions(temp.path(), permissions)?;
        }

        self.swap_in(temp, &dir)?;
        log::debug!(
            "committed {}: {} kept, {} replaced, {} deleted, {} added",
            self.path.display(),
            stats.entries_kept,
            stats.entries_replaced,
            stats.entries_deleted,
            stats.entries_added
        );
        Ok(stats.into())
    }

    fn swap_in(&mut self, temp: NamedTempFile, dir: &Path) -> Result<()> {
        // The original must not be held open while it is replaced.
        self.reader = None;

        if let Err(e) = temp.persist(&self.path) {
            self.reader = self.reopen();
            return Err(Error::Io(e.error));
        }

        #[cfg(unix)]
        if self.options.sync {
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                log::warn!("failed to sync directory {}: {}", dir.display(), e);
            }
        }
        #[cfg(not(unix))]
        let _ = dir;

        // The new archive is in place; a failed reopen must not report the
        // commit as failed.
        self.reader = self.reopen();
        Ok(())
    }

    fn reopen(&self) -> Option<F::Reader> {
        match File::open(&self.path)
            .map_err(Error::from)
            .and_then(|file| self.format.open(file))
        {
            Ok(reader) => Some(reader),
            Err(e) => {
                log::warn!("failed to reopen {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

fn not_reopened(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("archive {} could not be reopened", path.display()),
    ))
}

impl<F: ArchiveFormat> Drop for UpdatableArchive<F> {
    fn drop(&mut self) {
        if self.state != TransactionState::Closed {
            log::debug!("discarding open transaction on {}", self.path.display());
            if let Err(e) = self.teardown() {
                log::warn!("staging cleanup failed on drop: {}", e);
            }
        }
    }
}

/// Sink for staged entry content, returned by
/// [`UpdatableArchive::open_for_write`].
///
/// Inside a transaction the content is committed by
/// [`UpdatableArchive::end`]. A sink opened outside a transaction owns a
/// single-entry transaction instead: it commits on [`finish`](Self::finish)
/// or when dropped, and is discarded when dropped during a panic. A commit
/// on drop can only log its error, so call `finish` to observe it.
pub struct EntryWriter<'a, F: ArchiveFormat> {
    archive: &'a mut UpdatableArchive<F>,
    name: String,
    handle: StageHandle,
    written: u64,
    implicit: bool,
}

impl<F: ArchiveFormat> std::fmt::Debug for EntryWriter<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryWriter")
            .field("name", &self.name)
            .field("written", &self.written)
            .field("implicit", &self.implicit)
            .finish_non_exhaustive()
    }
}

impl<F: ArchiveFormat> EntryWriter<'_, F> {
    /// Returns the entry name being written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Returns true if this sink commits its own transaction.
    pub fn commits_on_finish(&self) -> bool {
        self.implicit
    }

    /// Completes the write.
    ///
    /// Commits the single-entry transaction of a sink opened outside a
    /// transaction and returns its summary. Inside a transaction this only
    /// closes the sink and returns `None`.
    pub fn finish(mut self) -> Result<Option<CommitSummary>> {
        if !std::mem::take(&mut self.implicit) {
            return Ok(None);
        }
        self.archive.end().map(Some)
    }

    /// Drops the content written to this sink.
    ///
    /// Inside a transaction the entry is unstaged again, so an earlier
    /// deletion of the same name takes effect.
    pub fn discard(mut self) -> Result<()> {
        if std::mem::take(&mut self.implicit) {
            return self.archive.abort();
        }
        if let Some(handle) = self.archive.ledger.take_replacement(&self.name) {
            self.archive.staging.release(handle)?;
        }
        Ok(())
    }

    fn staged(&mut self) -> io::Result<StagedWriter<'_>> {
        self.archive.staging.writer(self.handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "staged payload was released")
        })
    }
}

impl<F: ArchiveFormat> Write for EntryWriter<'_, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.staged()?.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged()?.flush()
    }
}

impl<F: ArchiveFormat> Drop for EntryWriter<'_, F> {
    fn drop(&mut self) {
        if !self.implicit {
            return;
        }
        let result = if std::thread::panicking() {
            self.archive.abort()
        } else {
            self.archive.end().map(|_| ())
        };
        if let Err(e) = result {
            log::warn!("commit of new entry '{}' failed: {}", self.name, e);
        }
    }
}

/// Scoped transaction returned by [`UpdatableArchive::begin_scoped`].
///
/// Dereferences to the archive. The transaction is aborted when the guard
/// is dropped without [`commit`](Self::commit).
pub struct TransactionGuard<'a, F: ArchiveFormat> {
    archive: &'a mut UpdatableArchive<F>,
}

impl<F: ArchiveFormat> TransactionGuard<'_, F> {
    /// Ends the transaction, committing its edits.
    pub fn commit(self) -> Result<CommitSummary> {
        self.archive.end()
    }

    /// Discards the transaction.
    pub fn rollback(self) -> Result<()> {
        self.archive.abort()
    }
}

impl<F: ArchiveFormat> Deref for TransactionGuard<'_, F> {
    type Target = UpdatableArchive<F>;

    fn deref(&self) -> &Self::Target {
        self.archive
    }
}

impl<F: ArchiveFormat> DerefMut for TransactionGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.archive
    }
}

impl<F: ArchiveFormat> Drop for TransactionGuard<'_, F> {
    fn drop(&mut self) {
        if self.archive.state != TransactionState::Closed {
            if let Err(e) = self.archive.abort() {
                log::warn!("staging cleanup failed while discarding transaction: {}", e);
            }
        }
    }
}
