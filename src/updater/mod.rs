//! Directory updaters keep one [`DirectoryStorage`] in sync with its source.
//!
//! * [`local`]: scans a share root on disk and hashes changed files.
//! * [`remote`]: mirrors the listing advertised by a peer.
//! * [`ticker`]: runs an updater periodically on its own thread.

pub mod local;
pub mod remote;
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

pub use local::{LocalDirectoryUpdater, LocalUpdaterConfig};
pub use remote::RemoteDirectoryUpdater;
pub use ticker::TickingThread;

use crate::storage::{DirectoryStorage, EntryIndex, EntryType, StorageResult, SweepStats};

/// Counters for one [`DirectoryUpdater::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Directories observed
    pub directories: usize,
    /// Files observed
    pub files: usize,
    /// Hash requests issued
    pub hash_requests: usize,
    /// Paths that could not be listed, stat'ed or hashed
    pub unreadable: usize,
    /// Remote records rejected as malformed
    pub malformed: usize,
    /// The remote listing could not be fetched
    pub fetch_failed: bool,
    /// Result of the sweep, if one ran
    pub swept: Option<SweepStats>,
}

impl TickReport {
    /// Entries removed by this tick's sweep.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.swept.map_or(0, |s| s.total())
    }

    /// Add the counters of `other` into `self`.
    pub fn merge(&mut self, other: &TickReport) {
        self.directories += other.directories;
        self.files += other.files;
        self.hash_requests += other.hash_requests;
        self.unreadable += other.unreadable;
        self.malformed += other.malformed;
        self.fetch_failed |= other.fetch_failed;
        self.swept = match (self.swept, other.swept) {
            (Some(a), Some(b)) => Some(SweepStats {
                removed_files: a.removed_files + b.removed_files,
                removed_directories: a.removed_directories + b.removed_directories,
            }),
            (a, b) => a.or(b),
        };
    }
}

/// Keeps one storage up to date with its source.
///
/// An updater is the only writer of its storage. `tick` is never run
/// concurrently with itself when driven by a [`TickingThread`].
pub trait DirectoryUpdater: Send + Sync {
    /// Name used in logs and thread names.
    fn name(&self) -> &str;

    /// The storage this updater maintains.
    fn storage(&self) -> &Arc<DirectoryStorage>;

    /// Run one update round.
    fn tick(&self) -> TickReport;

    /// Minimum delay between two ticks.
    fn tick_interval(&self) -> Duration;
}

/// Find the child `name` of `parent` in `storage`, creating it if missing.
///
/// An existing child of the other kind is removed first, together with its
/// subtree.
pub(crate) fn resolve_child(
    storage: &DirectoryStorage,
    parent: EntryIndex,
    name: &str,
    kind: EntryType,
) -> StorageResult<EntryIndex> {
    if let Some(existing) = storage.child(parent, name) {
        match storage.entry(existing) {
            Some(entry) if entry.entry_type() == kind => return Ok(existing),
            Some(_) => {
                log::debug!("[{}] '{}' is now a {:?}", storage.label(), name, kind);
                storage.remove_entry(existing)?;
            }
            None => {}
        }
    }
    storage.create_entry(parent, name, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_reports() {
        let mut total = TickReport {
            files: 2,
            hash_requests: 1,
            ..TickReport::default()
        };
        total.merge(&TickReport {
            files: 3,
            unreadable: 1,
            fetch_failed: true,
            swept: Some(SweepStats {
                removed_files: 4,
                removed_directories: 1,
            }),
            ..TickReport::default()
        });
        assert_eq!(total.files, 5);
        assert_eq!(total.unreadable, 1);
        assert!(total.fetch_failed);
        assert_eq!(total.removed(), 5);
    }

    #[test]
    fn test_resolve_child_replaces_other_kind() {
        let storage = DirectoryStorage::new("test");
        let root = storage.root();
        let file = resolve_child(&storage, root, "x", EntryType::File).unwrap();
        assert_eq!(resolve_child(&storage, root, "x", EntryType::File), Ok(file));

        let dir = resolve_child(&storage, root, "x", EntryType::Directory).unwrap();
        assert_ne!(dir, file);
        assert!(storage.entry(file).is_none());
        assert!(storage.entry(dir).unwrap().is_dir());
    }
}
