//! Pending per-entry edits of an open transaction.

use std::collections::{HashMap, HashSet};

use super::staging::StageHandle;

/// What the rebuild does with one entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write the staged payload in place of (or in addition to) the original.
    UseStaged(StageHandle),
    /// Drop the original entry.
    Delete,
    /// Copy the original entry unchanged.
    PassThrough,
}

/// Record of pending replacements and deletions, keyed by entry name.
///
/// A name may be both replaced and deleted; the replacement wins no matter
/// in which order the two were recorded.
#[derive(Debug, Default)]
pub struct EditLedger {
    replacements: HashMap<String, StageHandle>,
    deletions: HashSet<String>,
}

impl EditLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handle` as the replacement for `name`.
    ///
    /// Returns the handle it displaced, which the caller must release.
    pub fn stage_replacement(
        &mut self,
        name: impl Into<String>,
        handle: StageHandle,
    ) -> Option<StageHandle> {
        self.replacements.insert(name.into(), handle)
    }

    /// Marks `name` for deletion. Returns false if it was already marked.
    pub fn mark_deleted(&mut self, name: impl Into<String>) -> bool {
        self.deletions.insert(name.into())
    }

    /// Returns true if any replacement or deletion is recorded.
    pub fn has_pending_changes(&self) -> bool {
        !self.replacements.is_empty() || !self.deletions.is_empty()
    }

    /// Decides what happens to `name`.
    ///
    /// `original_exists` tells whether the original archive holds the name;
    /// deleting a name it does not hold drops nothing.
    pub fn resolve(&self, name: &str, original_exists: bool) -> Action {
        if let Some(&handle) = self.replacements.get(name) {
            Action::UseStaged(handle)
        } else if original_exists && self.deletions.contains(name) {
            Action::Delete
        } else {
            Action::PassThrough
        }
    }

    /// Returns the staged replacement for `name`, if any.
    pub fn staged(&self, name: &str) -> Option<StageHandle> {
        self.replacements.get(name).copied()
    }

    /// Returns true if `name` is marked for deletion.
    pub fn is_deleted(&self, name: &str) -> bool {
        self.deletions.contains(name)
    }

    /// Removes and returns the replacement for `name`.
    pub fn take_replacement(&mut self, name: &str) -> Option<StageHandle> {
        self.replacements.remove(name)
    }

    /// Removes and returns all remaining replacements in staging order.
    pub fn take_remaining(&mut self) -> Vec<(String, StageHandle)> {
        let mut remaining: Vec<_> = self.replacements.drain().collect();
        remaining.sort_by_key(|(_, handle)| *handle);
        remaining
    }

    /// Returns all handles currently referenced.
    pub fn handles(&self) -> impl Iterator<Item = StageHandle> + '_ {
        self.replacements.values().copied()
    }

    /// Returns the number of pending replacements.
    pub fn replacement_count(&self) -> usize {
        self.replacements.len()
    }

    /// Returns the number of pending deletions.
    pub fn deletion_count(&self) -> usize {
        self.deletions.len()
    }

    /// Forgets every pending edit.
    pub fn clear(&mut self) {
        self.replacements.clear();
        self.deletions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::staging::StagingArea;
    use tempfile::TempDir;

    fn handles(n: usize) -> (TempDir, StagingArea, Vec<StageHandle>) {
        let dir = TempDir::new().unwrap();
        let mut staging = StagingArea::new(Some(dir.path().to_path_buf()));
        let handles = (0..n).map(|_| staging.allocate().unwrap()).collect();
        (dir, staging, handles)
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = EditLedger::new();
        assert!(!ledger.has_pending_changes());
        assert_eq!(ledger.resolve("a.txt", true), Action::PassThrough);
    }

    #[test]
    fn test_mark_deleted_is_idempotent() {
        let mut ledger = EditLedger::new();
        assert!(ledger.mark_deleted("a.txt"));
        assert!(!ledger.mark_deleted("a.txt"));
        assert_eq!(ledger.deletion_count(), 1);
        assert!(ledger.has_pending_changes());
        assert_eq!(ledger.resolve("a.txt", true), Action::Delete);
    }

    #[test]
    fn test_delete_of_missing_entry_passes_through() {
        let mut ledger = EditLedger::new();
        ledger.mark_deleted("ghost.txt");
        assert_eq!(ledger.resolve("ghost.txt", false), Action::PassThrough);
    }

    #[test]
    fn test_replacement_wins_over_deletion() {
        let (_dir, _staging, h) = handles(2);
        let mut ledger = EditLedger::new();

        ledger.mark_deleted("a.txt");
        ledger.stage_replacement("a.txt", h[0]);
        assert_eq!(ledger.resolve("a.txt", true), Action::UseStaged(h[0]));

        ledger.stage_replacement("b.txt", h[1]);
        ledger.mark_deleted("b.txt");
        assert_eq!(ledger.resolve("b.txt", true), Action::UseStaged(h[1]));
    }

    #[test]
    fn test_restaging_returns_displaced_handle() {
        let (_dir, _staging, h) = handles(2);
        let mut ledger = EditLedger::new();

        assert_eq!(ledger.stage_replacement("a.txt", h[0]), None);
        assert_eq!(ledger.stage_replacement("a.txt", h[1]), Some(h[0]));
        assert_eq!(ledger.staged("a.txt"), Some(h[1]));
        assert_eq!(ledger.replacement_count(), 1);
    }

    #[test]
    fn test_take_remaining_in_staging_order() {
        let (_dir, _staging, h) = handles(3);
        let mut ledger = EditLedger::new();
        ledger.stage_replacement("z.txt", h[0]);
        ledger.stage_replacement("a.txt", h[1]);
        ledger.stage_replacement("m.txt", h[2]);
        assert!(ledger.take_replacement("a.txt").is_some());

        let remaining = ledger.take_remaining();
        let names: Vec<_> = remaining.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["z.txt", "m.txt"]);
        assert_eq!(ledger.replacement_count(), 0);
    }

    #[test]
    fn test_clear() {
        let (_dir, _staging, h) = handles(1);
        let mut ledger = EditLedger::new();
        ledger.stage_replacement("a.txt", h[0]);
        ledger.mark_deleted("b.txt");
        ledger.clear();
        assert!(!ledger.has_pending_changes());
        assert_eq!(ledger.handles().count(), 0);
    }
}
