//! # arcedit
//!
//! Transactional, in-place editing of zip and tar archives.
//!
//! Archive formats have no native support for updating or deleting an entry
//! in place. This crate lets callers stage replacements, additions and
//! deletions inside a transaction and then commits them by rebuilding the
//! archive and atomically swapping it over the original. Until the commit
//! completes, the archive on disk is untouched; a failed or abandoned
//! transaction leaves it exactly as it was.
//!
//! ## Quick Start
//!
//! ### Editing an Archive
//!
//! ```rust,no_run
//! use std::io::Write;
//! use arcedit::{Result, UpdatableArchive, ZipFormat};
//!
//! fn main() -> Result<()> {
//!     let mut archive = UpdatableArchive::<ZipFormat>::open("bundle.zip")?;
//!
//!     archive.begin()?;
//!     // Stream new content for an existing entry
//!     archive.open_for_write("config.json")?.write_all(br#"{"debug":false}"#)?;
//!     // Add a new entry from memory
//!     archive.write_entry("notes/changelog.txt", "v2: disable debug")?;
//!     // Remove an entry
//!     archive.delete("debug.log")?;
//!
//!     let summary = archive.end()?;
//!     println!("archive now holds {} entries", summary.total_entries());
//!     Ok(())
//! }
//! ```
//!
//! ### Scoped Transactions
//!
//! A scoped transaction commits only when the closure succeeds. Returning an
//! error or panicking discards every staged edit.
//!
//! ```rust,no_run
//! use arcedit::{Result, UpdatableArchive, ZipFormat};
//!
//! fn main() -> Result<()> {
//!     let mut archive = UpdatableArchive::<ZipFormat>::open("bundle.zip")?;
//!     let (_, summary) = archive.transaction(|archive| {
//!         let version = archive.read_to_vec("version.txt")?;
//!         let next = String::from_utf8_lossy(&version).trim().parse::<u32>().unwrap_or(0) + 1;
//!         archive.write_entry("version.txt", next.to_string())
//!     })?;
//!     assert!(summary.rebuilt);
//!     Ok(())
//! }
//! ```
//!
//! ### Creating an Archive
//!
//! ```rust,no_run
//! use arcedit::{Result, TarFormat, UpdatableArchive};
//!
//! fn main() -> Result<()> {
//!     let mut archive = UpdatableArchive::<TarFormat>::create("backup.tar")?;
//!     archive.begin()?;
//!     archive.write_entry("hello.txt", "Hello, World!")?;
//!     let _ = archive.end()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `zip` | Yes | Zip backend with stored and deflate entries |
//! | `tar` | Yes | Uncompressed tar backend |
//! | `bzip2` | No | BZip2 compressed zip entries |
//! | `zstd` | No | Zstandard compressed zip entries |
//!
//! ## Concurrency
//!
//! An [`UpdatableArchive`] holds at most one open transaction and is used
//! from one thread at a time. It takes no file locks; callers sharing an
//! archive path between processes must serialize access themselves.
//! Readers that open the path independently always see either the archive
//! before a commit or the complete archive after it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod edit;
pub mod entry_name;
pub mod error;
pub mod options;

pub use codec::{ArchiveFormat, ArchiveReader, ArchiveWriter, EntryInfo};
pub use edit::{
    Action, CommitSummary, EditLedger, EntryWriter, RebuildStats, StageHandle, StagedWriter,
    StagingArea, TransactionGuard, TransactionState, UpdatableArchive, rebuild,
};
pub use entry_name::EntryName;
pub use error::{Error, Result};
pub use options::UpdateOptions;

#[cfg(feature = "zip")]
pub use codec::{ZipEntryMeta, ZipFormat};

#[cfg(feature = "tar")]
pub use codec::{TarEntryMeta, TarFormat};

/// An updatable zip archive.
#[cfg(feature = "zip")]
pub type ZipArchiveFile = UpdatableArchive<ZipFormat>;

/// An updatable tar archive.
#[cfg(feature = "tar")]
pub type TarArchiveFile = UpdatableArchive<TarFormat>;
