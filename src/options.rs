//! Configuration for archive transactions.

use std::path::{Path, PathBuf};

/// Options controlling how a transaction stages and commits edits.
///
/// # Example
///
/// ```rust
/// use arcedit::UpdateOptions;
///
/// let options = UpdateOptions::new()
///     .staging_dir("/var/tmp/arcedit")
///     .sync(false);
/// assert!(!options.sync);
/// ```
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Directory for staging files.
    ///
    /// `None` uses the environment's temporary directory (`TMPDIR` on Unix).
    /// The rebuilt archive itself is always written next to the original so
    /// the final rename stays on one filesystem.
    pub staging_dir: Option<PathBuf>,
    /// Whether to fsync the rebuilt archive before it replaces the original.
    pub sync: bool,
    /// Whether the rebuilt archive takes over the original file's
    /// permission bits.
    pub preserve_permissions: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            staging_dir: None,
            sync: true,
            preserve_permissions: true,
        }
    }
}

impl UpdateOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory staging files are created in.
    pub fn staging_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.staging_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets whether the rebuilt archive is synced to disk before the swap.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Sets whether the original file's permissions carry over.
    pub fn preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = UpdateOptions::default();
        assert!(options.staging_dir.is_none());
        assert!(options.sync);
        assert!(options.preserve_permissions);
    }

    #[test]
    fn test_builder() {
        let options = UpdateOptions::new()
            .staging_dir("scratch")
            .sync(false)
            .preserve_permissions(false);
        assert_eq!(options.staging_dir.as_deref(), Some(Path::new("scratch")));
        assert!(!options.sync);
        assert!(!options.preserve_permissions);
    }
}
