//! Entry definitions for the directory tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use crate::scanner::Hash;

/// Stable identifier of one entry within one [`super::DirectoryStorage`].
///
/// Issued monotonically and never reused, even after the entry is removed.
/// Indices from different storages are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryIndex(pub(crate) u64);

impl EntryIndex {
    /// Raw numeric value, for logging and external correlation.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sweep state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Not seen since the last sweep.
    #[default]
    Unvisited,
    /// Seen since the last sweep.
    Confirmed,
    /// Exists but could not be listed; the sweep keeps it and everything below.
    Stale,
}

/// Requested kind for [`super::DirectoryStorage::create_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A directory
    Directory,
    /// A file
    File,
}

/// Kind-specific payload of an [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// A directory and its children ordered by name.
    Directory {
        /// Child indices keyed by name.
        children: BTreeMap<String, EntryIndex>,
    },
    /// A file.
    File {
        /// Size in bytes.
        size: u64,
        /// Content hash; `None` while a hash is pending.
        hash: Option<Hash>,
        /// Token of the outstanding hash request, if any.
        hash_request_id: Option<u64>,
    },
}

/// A node of the directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Path segment (empty for the root).
    pub name: String,
    /// Containing directory; `None` only for the root.
    pub parent: Option<EntryIndex>,
    /// Modification time observed at the last scan or ingest.
    pub last_modified: SystemTime,
    /// Sweep state.
    pub update_status: UpdateStatus,
    /// Directory or file payload.
    pub kind: EntryKind,
}

impl Entry {
    pub(crate) fn new(name: String, parent: Option<EntryIndex>, entry_type: EntryType) -> Self {
        let kind = match entry_type {
            EntryType::Directory => EntryKind::Directory {
                children: BTreeMap::new(),
            },
            EntryType::File => EntryKind::File {
                size: 0,
                hash: None,
                hash_request_id: None,
            },
        };
        Self {
            name,
            parent,
            last_modified: SystemTime::UNIX_EPOCH,
            update_status: UpdateStatus::Unvisited,
            kind,
        }
    }

    /// Whether this entry is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    /// Whether this entry is a file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    /// The kind of this entry.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Directory { .. } => EntryType::Directory,
            EntryKind::File { .. } => EntryType::File,
        }
    }

    /// File size, or `None` for directories.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File { size, .. } => Some(size),
            EntryKind::Directory { .. } => None,
        }
    }

    /// File hash, or `None` for directories and pending files.
    #[must_use]
    pub fn hash(&self) -> Option<Hash> {
        match self.kind {
            EntryKind::File { hash, .. } => hash,
            EntryKind::Directory { .. } => None,
        }
    }

    /// Outstanding hash request token, if any.
    #[must_use]
    pub fn hash_request_id(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File {
                hash_request_id, ..
            } => hash_request_id,
            EntryKind::Directory { .. } => None,
        }
    }

    /// Children of a directory (empty for files).
    pub fn children(&self) -> impl Iterator<Item = (&str, EntryIndex)> + '_ {
        let map = match &self.kind {
            EntryKind::Directory { children } => Some(children),
            EntryKind::File { .. } => None,
        };
        map.into_iter()
            .flat_map(|c| c.iter().map(|(name, idx)| (name.as_str(), *idx)))
    }
}
