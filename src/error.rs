//! Error types for archive transactions.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when staging and committing archive edits, along with a
//! convenient [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. Errors
//! fall into three groups:
//!
//! - **Transaction state**: [`Error::TransactionClosed`], [`Error::AlreadyOpen`]
//!   and [`Error::NoTransaction`] report API misuse. Nothing on disk changed.
//! - **Staging**: [`Error::StagingIo`] reports that temporary storage could not
//!   be allocated, read back or released.
//! - **Commit**: [`Error::Rebuild`] wraps the codec failure that aborted a
//!   commit. The original archive is left exactly as it was.
//!
//! ```rust,no_run
//! use arcedit::{Error, UpdatableArchive, ZipFormat};
//!
//! fn commit(archive: &mut UpdatableArchive<ZipFormat>) -> arcedit::Result<()> {
//!     match archive.end() {
//!         Ok(summary) => {
//!             println!("rewrote archive with {} entries", summary.total_entries());
//!             Ok(())
//!         }
//!         Err(Error::Rebuild { entry, source }) => {
//!             eprintln!("commit aborted at {:?}: {}", entry, source);
//!             Err(Error::Rebuild { entry, source })
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;
use std::path::PathBuf;

/// The error type for archive transaction operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred outside of staging and rebuilding, such as
    /// opening the archive or renaming the rebuilt archive into place.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write or delete of an existing entry was attempted while no
    /// transaction is open.
    ///
    /// Names the archive does not contain are not affected: deleting one
    /// does nothing, and writing one adds it in its own transaction.
    #[error("cannot modify '{name}': no transaction is open")]
    TransactionClosed {
        /// The entry that would have been modified.
        name: String,
    },

    /// [`begin`](crate::UpdatableArchive::begin) was called while a
    /// transaction is already open. Transactions do not nest.
    #[error("a transaction is already open on this archive")]
    AlreadyOpen,

    /// [`end`](crate::UpdatableArchive::end) was called with no open
    /// transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// The rebuild of the archive failed and the commit was aborted.
    ///
    /// The partially written archive has been discarded and the original
    /// archive is unchanged. `entry` names the entry being processed when
    /// the failure occurred, if any.
    #[error(
        "rebuild failed{}: {source}",
        .entry.as_deref().map(|e| format!(" at '{e}'")).unwrap_or_default()
    )]
    Rebuild {
        /// The entry being copied or written when the rebuild failed.
        entry: Option<String>,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Temporary staging storage could not be allocated, read or released.
    #[error("staging I/O error: {source}")]
    StagingIo {
        /// The staging file involved, when known.
        path: Option<PathBuf>,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The requested entry does not exist in the archive or among the
    /// staged entries.
    #[error("entry not found: {name}")]
    EntryNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// An entry name supplied for writing is not a valid archive-relative
    /// path.
    #[error("invalid entry name: {0}")]
    InvalidEntryName(String),

    /// The archive codec reported an error.
    #[error("archive codec error: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps `source` as a rebuild failure at `entry`.
    ///
    /// Errors that already are rebuild failures are returned unchanged so
    /// the innermost entry name is kept.
    pub fn rebuild(entry: Option<&str>, source: Error) -> Self {
        match source {
            e @ Error::Rebuild { .. } => e,
            other => Error::Rebuild {
                entry: entry.map(str::to_string),
                source: Box::new(other),
            },
        }
    }

    /// Creates a staging error for the given file.
    pub fn staging(path: Option<PathBuf>, source: io::Error) -> Self {
        Error::StagingIo { path, source }
    }

    /// Returns true if this error aborted a commit.
    pub fn is_rebuild(&self) -> bool {
        matches!(self, Error::Rebuild { .. })
    }

    /// Returns true if this error came from staging storage, directly or as
    /// the cause of a rebuild failure.
    pub fn is_staging(&self) -> bool {
        match self {
            Error::StagingIo { .. } => true,
            Error::Rebuild { source, .. } => source.is_staging(),
            _ => false,
        }
    }

    /// Returns true if this error reports misuse of the transaction state
    /// machine. Such errors leave the archive and staging area unchanged.
    pub fn is_transaction_state(&self) -> bool {
        matches!(
            self,
            Error::TransactionClosed { .. } | Error::AlreadyOpen | Error::NoTransaction
        )
    }

    /// Returns the entry name associated with this error, if any.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Error::TransactionClosed { name } | Error::EntryNotFound { name } => Some(name),
            Error::Rebuild { entry, .. } => entry.as_deref(),
            _ => None,
        }
    }
}

#[cfg(feature = "zip")]
impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Codec(Box::new(other)),
        }
    }
}

/// A specialized Result type for archive transaction operations.
pub type Result<T> = std::result::Result<T, Error>;
