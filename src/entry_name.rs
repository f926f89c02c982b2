//! Validated entry names for staged writes.

use crate::{Error, Result};
use std::fmt;

/// Maximum length for entry names (in bytes).
///
/// The zip local header stores the name length in 16 bits.
const MAX_NAME_LENGTH: usize = u16::MAX as usize;

/// An archive-relative entry name accepted for writing.
///
/// Names read from an existing archive are used verbatim; only names the
/// caller stages new content under go through this validation, so an edit
/// can never introduce an entry that escapes the extraction root.
///
/// `EntryName` validates that:
/// - The name is not empty and contains no NUL bytes
/// - The name is not absolute (no leading `/` or `\`, no drive letter)
/// - Only forward slashes are used as separators
/// - No empty segments exist (no `//` or trailing `/`)
/// - No `.` or `..` segments are present
///
/// # Examples
///
/// ```
/// use arcedit::EntryName;
///
/// let name = EntryName::new("docs/readme.txt").unwrap();
/// assert_eq!(name.as_str(), "docs/readme.txt");
///
/// assert!(EntryName::new("../secret").is_err());
/// assert!(EntryName::new("/etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Creates a new `EntryName`, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntryName`] describing the first rule the
    /// name violates.
    pub fn new(s: &str) -> Result<Self> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }

    fn validate(s: &str) -> Result<()> {
        if s.is_empty() {
            return Err(Error::InvalidEntryName("empty name".into()));
        }

        if s.contains('\0') {
            return Err(Error::InvalidEntryName("contains NUL byte".into()));
        }

        if s.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidEntryName(format!(
                "name exceeds maximum length of {} bytes",
                MAX_NAME_LENGTH
            )));
        }

        if s.contains('\\') {
            return Err(Error::InvalidEntryName(
                "backslash separators not allowed".into(),
            ));
        }

        if s.starts_with('/') || has_drive_prefix(s) {
            return Err(Error::InvalidEntryName("absolute name not allowed".into()));
        }

        if s.ends_with('/') {
            return Err(Error::InvalidEntryName("trailing slash not allowed".into()));
        }

        for segment in s.split('/') {
            match segment {
                "" => {
                    return Err(Error::InvalidEntryName(
                        "empty segment (consecutive slashes)".into(),
                    ));
                }
                "." => return Err(Error::InvalidEntryName("'.' segment not allowed".into())),
                ".." => {
                    return Err(Error::InvalidEntryName(
                        "'..' segment not allowed (path traversal)".into(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Returns the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the name, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for EntryName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::str::FromStr for EntryName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
