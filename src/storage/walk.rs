//! Snapshot traversal of a directory tree.

use std::sync::Arc;

use super::entry::{Entry, EntryIndex};
use super::tree::Tree;
use crate::scanner::path_utils;

/// Lazy depth-first traversal over a snapshot of a [`super::DirectoryStorage`].
///
/// Yields `(relative path, entry)` for every entry below the root in
/// pre-order, children in name order. The snapshot is taken when the walk is
/// created: later mutations of the storage are not visible, and the walk
/// never blocks them. Cloning a `Walk` gives an independent cursor over the
/// same snapshot.
#[derive(Debug, Clone)]
pub struct Walk {
    tree: Arc<Tree>,
    stack: Vec<(EntryIndex, String)>,
}

impl Walk {
    pub(crate) fn new(tree: Arc<Tree>) -> Self {
        let mut walk = Self {
            tree,
            stack: Vec::new(),
        };
        walk.push_children(walk.tree.root, "");
        walk
    }

    fn push_children(&mut self, index: EntryIndex, path: &str) {
        let Some(entry) = self.tree.entries.get(&index) else {
            return;
        };
        let children: Vec<_> = entry
            .children()
            .map(|(name, child)| (child, path_utils::join(path, name)))
            .collect();
        self.stack.extend(children.into_iter().rev());
    }
}

impl Iterator for Walk {
    type Item = (String, Entry);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, path) = self.stack.pop()?;
            let Some(entry) = self.tree.entries.get(&index).cloned() else {
                continue;
            };
            if entry.is_dir() {
                self.push_children(index, &path);
            }
            return Some((path, entry));
        }
    }
}
