//! Serializable form of a directory tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entry::{Entry, EntryIndex};
use super::tree::{self, Tree};
use super::StorageError;

/// Current version of the storage snapshot format.
pub const STORAGE_SNAPSHOT_VERSION: u32 = 1;

/// Lossless, versioned copy of one [`super::DirectoryStorage`].
///
/// Indices and the index counter are preserved so a restored storage keeps
/// issuing fresh indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Storage label.
    pub label: String,
    /// Index of the root directory.
    pub root: EntryIndex,
    /// Next index the storage will issue.
    pub next_index: u64,
    /// All entries, root included.
    pub entries: Vec<(EntryIndex, Entry)>,
}

impl StorageSnapshot {
    pub(crate) fn from_tree(label: &str, tree: &Tree) -> Self {
        let ordered: BTreeMap<_, _> = tree.entries.iter().map(|(i, e)| (*i, e.clone())).collect();
        Self {
            version: STORAGE_SNAPSHOT_VERSION,
            created_at: Utc::now(),
            label: label.to_string(),
            root: tree.root,
            next_index: tree.next_index,
            entries: ordered.into_iter().collect(),
        }
    }

    pub(crate) fn into_tree(self) -> Result<Tree, StorageError> {
        if self.version != STORAGE_SNAPSHOT_VERSION {
            return Err(StorageError::CorruptSnapshot(format!(
                "unsupported version {} (expected {})",
                self.version, STORAGE_SNAPSHOT_VERSION
            )));
        }
        let count = self.entries.len();
        let entries: BTreeMap<EntryIndex, Entry> = self.entries.into_iter().collect();
        if entries.len() != count {
            return Err(StorageError::CorruptSnapshot(
                "duplicate entry index".to_string(),
            ));
        }
        let tree = tree::from_parts(entries, self.root, self.next_index);
        tree.validate().map_err(StorageError::CorruptSnapshot)?;
        Ok(tree)
    }
}
