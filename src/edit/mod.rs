//! Transactional editing of an existing archive.
//!
//! This module provides the ability to modify an archive in place by:
//! - Replacing entry contents
//! - Adding new entries
//! - Deleting entries
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::Write;
//! use arcedit::{UpdatableArchive, ZipFormat};
//!
//! let mut archive = UpdatableArchive::<ZipFormat>::open("site.zip")?;
//!
//! archive.begin()?;
//! archive.delete("unwanted.txt")?;
//! archive.open_for_write("index.html")?.write_all(b"<h1>Hello</h1>")?;
//! let summary = archive.end()?;
//!
//! println!(
//!     "kept {} entries, replaced {}, deleted {}, added {}",
//!     summary.entries_kept,
//!     summary.entries_replaced,
//!     summary.entries_deleted,
//!     summary.entries_added
//! );
//! # Ok::<(), arcedit::Error>(())
//! ```
//!
//! # Implementation Notes
//!
//! Ending a transaction works by:
//! 1. Writing a new archive into a temporary file beside the original
//! 2. Copying untouched entries in their original order
//! 3. Writing staged replacements in place of the entries they replace
//! 4. Skipping deleted entries
//! 5. Appending new entries in the order they were staged
//! 6. Renaming the temporary file over the original
//!
//! Staged content lives in a [`StagingArea`] until the rebuild has consumed
//! it, so memory use does not grow with the size of the edits.

mod ledger;
mod rebuild;
mod staging;
mod transaction;

pub use ledger::{Action, EditLedger};
pub use rebuild::{RebuildStats, rebuild};
pub use staging::{StageHandle, StagedWriter, StagingArea};
pub use transaction::{
    CommitSummary, EntryWriter, TransactionGuard, TransactionState, UpdatableArchive,
};
