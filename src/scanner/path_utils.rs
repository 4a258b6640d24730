//! Unicode name normalization and relative path helpers.
//!
//! Entry names are stored in NFC (Composed) form. macOS reports file names in
//! NFD, Linux and Windows usually in NFC; normalizing keeps a share's index
//! identical across platforms and lets a remote listing resolve the same
//! paths as the local one.
//!
//! Paths inside a Directory Storage are relative, `/`-separated and never
//! contain empty, `.` or `..` segments.
//!
//! # Example
//!
//! ```
//! use sharelist::scanner::path_utils::{normalize_name, split_relative};
//!
//! assert_eq!(normalize_name("cafe\u{0301}.txt"), "café.txt");
//! assert_eq!(split_relative("music/a.mp3"), Some(vec!["music", "a.mp3"]));
//! assert_eq!(split_relative("../etc/passwd"), None);
//! ```

use std::ffi::OsStr;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Normalize a single entry name to NFC.
#[must_use]
pub fn normalize_name(s: &str) -> String {
    s.nfc().collect()
}

/// Convert an OS file name to a normalized entry name.
///
/// Non-UTF-8 names are converted lossily; the replacement character keeps the
/// entry addressable even though it cannot be opened by that name again.
#[must_use]
pub fn os_name(name: &OsStr) -> String {
    normalize_name(&name.to_string_lossy())
}

/// Check whether `name` is usable as a single path segment.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

/// Split a relative `/`-separated path into its segments.
///
/// An empty string yields no segments (the root). Leading, trailing and
/// repeated separators are rejected together with `.` and `..` segments.
///
/// # Returns
///
/// `None` if the path is absolute or contains an invalid segment.
#[must_use]
pub fn split_relative(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return Some(Vec::new());
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().all(|s| is_valid_name(s)) {
        Some(segments)
    } else {
        None
    }
}

/// Render a relative path of a filesystem entry below `root` in storage form.
///
/// # Returns
///
/// `None` if `path` is not below `root`.
#[must_use]
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel.iter().map(os_name).collect();
    Some(parts.join("/"))
}

/// Join a parent relative path and a child name.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_name_nfd() {
        assert_eq!(normalize_name("cafe\u{0301}"), "caf\u{e9}");
        assert_eq!(normalize_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("a.txt"));
        assert!(is_valid_name(".hidden"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("."));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
    }

    #[test]
    fn test_split_relative() {
        assert_eq!(split_relative(""), Some(vec![]));
        assert_eq!(split_relative("a"), Some(vec!["a"]));
        assert_eq!(split_relative("a/b/c.txt"), Some(vec!["a", "b", "c.txt"]));
        assert_eq!(split_relative("/a"), None);
        assert_eq!(split_relative("a//b"), None);
        assert_eq!(split_relative("a/"), None);
        assert_eq!(split_relative("a/../b"), None);
    }

    #[test]
    fn test_relative_to() {
        let root = PathBuf::from("/share");
        assert_eq!(
            relative_to(&root, Path::new("/share/dir/a.txt")),
            Some("dir/a.txt".to_string())
        );
        assert_eq!(relative_to(&root, Path::new("/share")), Some(String::new()));
        assert_eq!(relative_to(&root, Path::new("/other/a.txt")), None);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }
}
