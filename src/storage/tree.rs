//! Arena of entries keyed by [`EntryIndex`].
//!
//! [`Tree`] holds the actual data and enforces the structural invariants. It
//! has no locking of its own; [`super::DirectoryStorage`] wraps it in a
//! copy-on-write `Arc` behind an `RwLock`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::SystemTime;

use super::entry::{Entry, EntryIndex, EntryKind, EntryType, UpdateStatus};
use super::{StorageError, StorageResult, SweepStats};
use crate::listing::ListingRecord;
use crate::scanner::path_utils::{self, normalize_name};
use crate::scanner::Hash;

#[derive(Debug, Clone)]
pub(crate) struct Tree {
    pub(crate) entries: HashMap<EntryIndex, Entry>,
    pub(crate) root: EntryIndex,
    pub(crate) next_index: u64,
}

impl Tree {
    pub(crate) fn new() -> Self {
        let root = EntryIndex(0);
        let mut entries = HashMap::new();
        entries.insert(root, Entry::new(String::new(), None, EntryType::Directory));
        Self {
            entries,
            root,
            next_index: 1,
        }
    }

    pub(crate) fn get(&self, index: EntryIndex) -> StorageResult<&Entry> {
        self.entries.get(&index).ok_or(StorageError::NotFound(index))
    }

    fn get_mut(&mut self, index: EntryIndex) -> StorageResult<&mut Entry> {
        self.entries
            .get_mut(&index)
            .ok_or(StorageError::NotFound(index))
    }

    pub(crate) fn create(
        &mut self,
        parent: EntryIndex,
        name: &str,
        entry_type: EntryType,
    ) -> StorageResult<EntryIndex> {
        let name = normalize_name(name);
        if !path_utils::is_valid_name(&name) {
            return Err(StorageError::InvalidName(name));
        }

        let index = EntryIndex(self.next_index);
        match self.entries.get_mut(&parent) {
            Some(Entry {
                kind: EntryKind::Directory { children },
                ..
            }) => {
                if children.contains_key(&name) {
                    return Err(StorageError::DuplicateName { parent, name });
                }
                children.insert(name.clone(), index);
            }
            _ => return Err(StorageError::InvalidParent(parent)),
        }

        self.next_index += 1;
        self.entries
            .insert(index, Entry::new(name, Some(parent), entry_type));
        Ok(index)
    }

    /// Remove an entry and everything below it. Returns (files, directories) removed.
    pub(crate) fn remove(&mut self, index: EntryIndex) -> StorageResult<(usize, usize)> {
        if index == self.root {
            return Err(StorageError::RootRemoval);
        }
        let entry = self.get(index)?;
        let parent = entry.parent;
        let name = entry.name.clone();

        if let Some(parent) = parent {
            if let Some(Entry {
                kind: EntryKind::Directory { children },
                ..
            }) = self.entries.get_mut(&parent)
            {
                children.remove(&name);
            }
        }

        let mut removed = (0, 0);
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.entries.remove(&current) {
                match entry.kind {
                    EntryKind::Directory { children } => {
                        removed.1 += 1;
                        stack.extend(children.into_values());
                    }
                    EntryKind::File { .. } => removed.0 += 1,
                }
            }
        }
        Ok(removed)
    }

    pub(crate) fn update_file_metadata(
        &mut self,
        index: EntryIndex,
        new_size: u64,
        modified: SystemTime,
        new_hash: Option<Hash>,
    ) -> StorageResult<()> {
        let entry = self.get_mut(index)?;
        match &mut entry.kind {
            EntryKind::File {
                size,
                hash,
                hash_request_id,
            } => {
                *size = new_size;
                *hash = new_hash;
                if new_hash.is_some() {
                    *hash_request_id = None;
                }
            }
            EntryKind::Directory { .. } => return Err(StorageError::WrongKind(index)),
        }
        entry.last_modified = modified;
        Ok(())
    }

    /// Store `new_hash` only if the file still carries `token` and the
    /// metadata the hash was computed for.
    pub(crate) fn apply_hash(
        &mut self,
        index: EntryIndex,
        token: u64,
        expected_size: u64,
        modified: SystemTime,
        new_hash: Hash,
    ) -> StorageResult<bool> {
        let entry = self.get_mut(index)?;
        let same_mtime = entry.last_modified == modified;
        match &mut entry.kind {
            EntryKind::File {
                size,
                hash,
                hash_request_id,
            } => {
                if *hash_request_id != Some(token) || *size != expected_size || !same_mtime {
                    return Ok(false);
                }
                *hash = Some(new_hash);
                *hash_request_id = None;
                Ok(true)
            }
            EntryKind::Directory { .. } => Err(StorageError::WrongKind(index)),
        }
    }

    pub(crate) fn set_hash_request(
        &mut self,
        index: EntryIndex,
        token: Option<u64>,
    ) -> StorageResult<()> {
        match &mut self.get_mut(index)?.kind {
            EntryKind::File {
                hash_request_id, ..
            } => {
                *hash_request_id = token;
                Ok(())
            }
            EntryKind::Directory { .. } => Err(StorageError::WrongKind(index)),
        }
    }

    pub(crate) fn set_directory_modified(
        &mut self,
        index: EntryIndex,
        modified: SystemTime,
    ) -> StorageResult<()> {
        let entry = self.get_mut(index)?;
        if !entry.is_dir() {
            return Err(StorageError::WrongKind(index));
        }
        entry.last_modified = modified;
        Ok(())
    }

    pub(crate) fn set_update_status(
        &mut self,
        index: EntryIndex,
        status: UpdateStatus,
    ) -> StorageResult<()> {
        self.get_mut(index)?.update_status = status;
        Ok(())
    }

    pub(crate) fn child(&self, parent: EntryIndex, name: &str) -> Option<EntryIndex> {
        match &self.entries.get(&parent)?.kind {
            EntryKind::Directory { children } => children.get(&normalize_name(name)).copied(),
            EntryKind::File { .. } => None,
        }
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<EntryIndex> {
        let segments = path_utils::split_relative(path)?;
        segments
            .into_iter()
            .try_fold(self.root, |current, segment| self.child(current, segment))
    }

    pub(crate) fn path_of(&self, index: EntryIndex) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = self.entries.get(&index)?;
        while let Some(parent) = current.parent {
            parts.push(current.name.as_str());
            current = self.entries.get(&parent)?;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    /// Remove every entry that was neither confirmed nor protected by a stale
    /// ancestor, then reset all surviving entries to `Unvisited`.
    pub(crate) fn sweep(&mut self) -> SweepStats {
        let mut doomed = Vec::new();
        let mut survivors = Vec::new();
        let mut stack = vec![(self.root, false)];

        while let Some((index, protected)) = stack.pop() {
            let Some(entry) = self.entries.get(&index) else {
                continue;
            };
            let keep = protected || index == self.root || entry.update_status != UpdateStatus::Unvisited;
            if !keep {
                doomed.push(index);
                continue;
            }
            survivors.push(index);
            let protect_children = protected || entry.update_status == UpdateStatus::Stale;
            stack.extend(entry.children().map(|(_, child)| (child, protect_children)));
        }

        let mut stats = SweepStats::default();
        for index in doomed {
            if let Ok((files, dirs)) = self.remove(index) {
                stats.removed_files += files;
                stats.removed_directories += dirs;
            }
        }
        for index in survivors {
            if let Some(entry) = self.entries.get_mut(&index) {
                entry.update_status = UpdateStatus::Unvisited;
            }
        }
        stats
    }

    pub(crate) fn find_by_hash(&self, hash: &Hash) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, e)| e.hash().as_ref() == Some(hash))
            .filter_map(|(idx, _)| self.path_of(*idx).map(PathBuf::from))
            .collect();
        paths.sort();
        paths
    }

    pub(crate) fn export_listing(&self) -> Vec<ListingRecord> {
        let mut records = Vec::new();
        let mut stack = vec![(self.root, String::new())];
        while let Some((index, path)) = stack.pop() {
            let Some(entry) = self.entries.get(&index) else {
                continue;
            };
            match &entry.kind {
                EntryKind::Directory { children } => {
                    for (name, child) in children.iter().rev() {
                        stack.push((*child, path_utils::join(&path, name)));
                    }
                }
                EntryKind::File {
                    size,
                    hash: Some(hash),
                    ..
                } => records.push(ListingRecord {
                    path,
                    size: *size,
                    modified: entry.last_modified,
                    hash: *hash,
                }),
                EntryKind::File { hash: None, .. } => {}
            }
        }
        records
    }

    /// Check every structural invariant; used when restoring snapshots.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let root = self
            .entries
            .get(&self.root)
            .ok_or_else(|| format!("root {} missing", self.root))?;
        if root.parent.is_some() || !root.is_dir() {
            return Err("root must be a directory without parent".to_string());
        }

        for (index, entry) in &self.entries {
            if index.0 >= self.next_index {
                return Err(format!("index {index} not below next index {}", self.next_index));
            }
            if *index != self.root {
                if !path_utils::is_valid_name(&entry.name) {
                    return Err(format!("entry {index} has invalid name {:?}", entry.name));
                }
                let parent = entry
                    .parent
                    .ok_or_else(|| format!("entry {index} has no parent"))?;
                let linked = self
                    .entries
                    .get(&parent)
                    .and_then(|p| match &p.kind {
                        EntryKind::Directory { children } => children.get(&entry.name),
                        EntryKind::File { .. } => None,
                    })
                    .copied();
                if linked != Some(*index) {
                    return Err(format!("entry {index} not linked from parent {parent}"));
                }
            }
            for (name, child) in entry.children() {
                match self.entries.get(&child) {
                    Some(c) if c.parent == Some(*index) && c.name == name => {}
                    _ => return Err(format!("child {child} of {index} is dangling")),
                }
            }
        }

        let mut reachable = 0usize;
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            reachable += 1;
            if reachable > self.entries.len() {
                return Err("cycle detected".to_string());
            }
            if let Some(entry) = self.entries.get(&index) {
                stack.extend(entry.children().map(|(_, c)| c));
            }
        }
        if reachable != self.entries.len() {
            return Err(format!(
                "{} entries unreachable from root",
                self.entries.len() - reachable
            ));
        }
        Ok(())
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a tree from raw parts without validation.
pub(crate) fn from_parts(
    entries: BTreeMap<EntryIndex, Entry>,
    root: EntryIndex,
    next_index: u64,
) -> Tree {
    Tree {
        entries: entries.into_iter().collect(),
        root,
        next_index,
    }
}
