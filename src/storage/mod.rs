//! Directory Storage: an indexed tree of shared directories and files.
//!
//! One [`DirectoryStorage`] represents one shared hierarchy, either a local
//! share root or the listing advertised by one remote peer. Entries are
//! owned by the storage and addressed by stable [`EntryIndex`] values, so a
//! reader holding an index never observes a dangling reference: a removed
//! index simply reports [`StorageError::NotFound`].
//!
//! # Concurrency
//!
//! The tree is kept behind `RwLock<Arc<Tree>>`. Mutations take the write lock
//! briefly and copy the tree only when a [`Walk`] still holds the previous
//! version. [`DirectoryStorage::walk`] clones the `Arc` and releases the lock
//! immediately, so traversal never blocks the owning updater.
//!
//! # Architecture
//!
//! * [`entry`]: entry, index and status types.
//! * `tree`: the arena and its invariants.
//! * [`walk`]: snapshot traversal.
//! * [`snapshot`]: serializable, versioned form of a tree.
//! * [`io`]: checksummed persistence of snapshots.

pub mod entry;
pub mod io;
pub mod snapshot;
mod tree;
pub mod walk;

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

pub use entry::{Entry, EntryIndex, EntryKind, EntryType, UpdateStatus};
pub use snapshot::{StorageSnapshot, STORAGE_SNAPSHOT_VERSION};
pub use walk::Walk;

use crate::listing::ListingRecord;
use crate::scanner::Hash;
use tree::Tree;

/// Tree-structure errors. These indicate caller bugs and are always
/// returned, never swallowed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The parent does not exist or is not a directory.
    #[error("Invalid parent entry: {0}")]
    InvalidParent(EntryIndex),

    /// A sibling with the same name already exists.
    #[error("Entry {parent} already has a child named '{name}'")]
    DuplicateName {
        /// Parent directory
        parent: EntryIndex,
        /// Conflicting name
        name: String,
    },

    /// The index is unknown or was removed.
    #[error("Entry not found: {0}")]
    NotFound(EntryIndex),

    /// The root cannot be removed.
    #[error("The root entry cannot be removed")]
    RootRemoval,

    /// The operation does not apply to this kind of entry.
    #[error("Wrong entry kind for operation: {0}")]
    WrongKind(EntryIndex),

    /// The name is empty, `.`, `..` or contains a separator.
    #[error("Invalid entry name: '{0}'")]
    InvalidName(String),

    /// A snapshot violates the tree invariants.
    #[error("Corrupt storage snapshot: {0}")]
    CorruptSnapshot(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Counters returned by [`DirectoryStorage::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Files removed
    pub removed_files: usize,
    /// Directories removed
    pub removed_directories: usize,
}

impl SweepStats {
    /// Total number of entries removed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.removed_files + self.removed_directories
    }
}

/// A concurrently readable directory tree.
#[derive(Debug)]
pub struct DirectoryStorage {
    label: String,
    tree: RwLock<Arc<Tree>>,
}

impl DirectoryStorage {
    /// Create an empty storage containing only the root directory.
    ///
    /// `label` identifies the storage in logs (a share name or a peer id).
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tree: RwLock::new(Arc::new(Tree::new())),
        }
    }

    /// Label given at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn read(&self) -> Arc<Tree> {
        Arc::clone(&self.tree.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Tree) -> T) -> T {
        let mut guard = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard))
    }

    /// Index of the root directory.
    #[must_use]
    pub fn root(&self) -> EntryIndex {
        self.read().root
    }

    /// Number of entries, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the storage holds nothing but the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Create a new child entry.
    ///
    /// The name is normalized to NFC. New files start with size 0 and no
    /// hash; new entries start `Unvisited`.
    ///
    /// # Errors
    ///
    /// * [`StorageError::InvalidParent`] if `parent` is missing or a file
    /// * [`StorageError::DuplicateName`] if a sibling already has `name`
    /// * [`StorageError::InvalidName`] for empty, `.`, `..` or `/`-containing names
    pub fn create_entry(
        &self,
        parent: EntryIndex,
        name: &str,
        kind: EntryType,
    ) -> StorageResult<EntryIndex> {
        let index = self.mutate(|t| t.create(parent, name, kind))?;
        log::trace!("[{}] created {:?} {} '{}'", self.label, kind, index, name);
        Ok(index)
    }

    /// Remove an entry; directories are removed with all descendants.
    ///
    /// # Errors
    ///
    /// * [`StorageError::RootRemoval`] for the root
    /// * [`StorageError::NotFound`] for unknown indices
    pub fn remove_entry(&self, index: EntryIndex) -> StorageResult<()> {
        let (files, dirs) = self.mutate(|t| t.remove(index))?;
        log::trace!(
            "[{}] removed {} ({} files, {} directories)",
            self.label,
            index,
            files,
            dirs
        );
        Ok(())
    }

    /// Set size, modification time and hash of a file.
    ///
    /// Passing `None` marks the hash as pending. Passing a hash also clears
    /// the outstanding request token.
    ///
    /// # Errors
    ///
    /// [`StorageError::WrongKind`] for directories, [`StorageError::NotFound`]
    /// for unknown indices.
    pub fn update_file_metadata(
        &self,
        index: EntryIndex,
        size: u64,
        modified: SystemTime,
        hash: Option<Hash>,
    ) -> StorageResult<()> {
        self.mutate(|t| t.update_file_metadata(index, size, modified, hash))
    }

    /// Atomically store a computed hash if the file is still waiting for
    /// request `token` and its size and modification time are unchanged.
    ///
    /// Returns `false` (and changes nothing) when the result is stale.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] for unknown indices,
    /// [`StorageError::WrongKind`] for directories.
    pub fn apply_hash(
        &self,
        index: EntryIndex,
        token: u64,
        size: u64,
        modified: SystemTime,
        hash: Hash,
    ) -> StorageResult<bool> {
        self.mutate(|t| t.apply_hash(index, token, size, modified, hash))
    }

    /// Record (or clear) the outstanding hash request token of a file.
    ///
    /// # Errors
    ///
    /// [`StorageError::WrongKind`] for directories.
    pub fn set_hash_request(&self, index: EntryIndex, token: Option<u64>) -> StorageResult<()> {
        self.mutate(|t| t.set_hash_request(index, token))
    }

    /// Set the modification time of a directory.
    ///
    /// # Errors
    ///
    /// [`StorageError::WrongKind`] for files.
    pub fn set_directory_modified(
        &self,
        index: EntryIndex,
        modified: SystemTime,
    ) -> StorageResult<()> {
        self.mutate(|t| t.set_directory_modified(index, modified))
    }

    /// Set the sweep state of an entry.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] for unknown indices.
    pub fn set_update_status(&self, index: EntryIndex, status: UpdateStatus) -> StorageResult<()> {
        self.mutate(|t| t.set_update_status(index, status))
    }

    /// A copy of the entry at `index`.
    #[must_use]
    pub fn entry(&self, index: EntryIndex) -> Option<Entry> {
        self.read().entries.get(&index).cloned()
    }

    /// Child of `parent` named `name`.
    #[must_use]
    pub fn child(&self, parent: EntryIndex, name: &str) -> Option<EntryIndex> {
        self.read().child(parent, name)
    }

    /// Children of a directory in name order (empty for files or unknown indices).
    #[must_use]
    pub fn children(&self, index: EntryIndex) -> Vec<(String, EntryIndex)> {
        self.read()
            .entries
            .get(&index)
            .map(|e| e.children().map(|(n, i)| (n.to_string(), i)).collect())
            .unwrap_or_default()
    }

    /// Resolve a `/`-separated path relative to the root.
    ///
    /// The empty path resolves to the root. Missing segments yield `None`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<EntryIndex> {
        self.read().lookup(path)
    }

    /// Relative path of an entry (empty for the root).
    #[must_use]
    pub fn path_of(&self, index: EntryIndex) -> Option<String> {
        self.read().path_of(index)
    }

    /// Hash and size of the file at `path`, if it exists and is hashed.
    #[must_use]
    pub fn file_info(&self, path: &str) -> Option<(Hash, u64)> {
        let tree = self.read();
        let entry = tree.entries.get(&tree.lookup(path)?)?;
        match entry.kind {
            EntryKind::File {
                size,
                hash: Some(hash),
                ..
            } => Some((hash, size)),
            _ => None,
        }
    }

    /// Paths of all files with the given content hash.
    #[must_use]
    pub fn find_by_hash(&self, hash: &Hash) -> Vec<PathBuf> {
        self.read().find_by_hash(hash)
    }

    /// Depth-first traversal over a snapshot taken now.
    #[must_use]
    pub fn walk(&self) -> Walk {
        Walk::new(self.read())
    }

    /// Remove entries not confirmed since the last sweep and reset all marks.
    pub fn sweep(&self) -> SweepStats {
        let stats = self.mutate(Tree::sweep);
        if stats.total() > 0 {
            log::debug!(
                "[{}] sweep removed {} files and {} directories",
                self.label,
                stats.removed_files,
                stats.removed_directories
            );
        }
        stats
    }

    /// All hashed files as listing records, in walk order.
    #[must_use]
    pub fn export_listing(&self) -> Vec<ListingRecord> {
        self.read().export_listing()
    }

    /// Capture the full tree as a versioned snapshot.
    #[must_use]
    pub fn serialize(&self) -> StorageSnapshot {
        StorageSnapshot::from_tree(&self.label, &self.read())
    }

    /// Rebuild a storage from a snapshot.
    ///
    /// # Errors
    ///
    /// [`StorageError::CorruptSnapshot`] if the version is unknown or the
    /// snapshot violates a tree invariant.
    pub fn restore(snapshot: StorageSnapshot) -> StorageResult<Self> {
        let label = snapshot.label.clone();
        let tree = snapshot.into_tree()?;
        Ok(Self {
            label,
            tree: RwLock::new(Arc::new(tree)),
        })
    }
}
