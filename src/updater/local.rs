//! Local Directory Updater: reconciles a share root on disk with its storage.
//!
//! Each tick walks the share root, resolves every observed path in the
//! storage and marks it `Confirmed`. Files whose size or modification time
//! changed get their hash cleared and a new request is sent to the
//! [`HashCache`]. Results come back through the updater's hash client and are applied
//! only if the entry still matches what was requested. On the sweep interval
//! every entry that was not confirmed since the previous sweep is removed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use super::{resolve_child, DirectoryUpdater, TickReport};
use crate::cache::{HashCache, HashReady, HashStorageClient};
use crate::scanner::{HashError, ScanError, WalkedEntry, WalkedKind, Walker, WalkerConfig};
use crate::scanner::path_utils;
use crate::storage::{
    DirectoryStorage, EntryIndex, EntryType, StorageResult, SweepStats, UpdateStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scheduling and traversal settings of a [`LocalDirectoryUpdater`].
#[derive(Debug, Clone)]
pub struct LocalUpdaterConfig {
    /// Delay between two scans
    pub scan_interval: Duration,
    /// Minimum delay between two sweeps
    pub sweep_interval: Duration,
    /// Traversal options
    pub walker: WalkerConfig,
}

impl Default for LocalUpdaterConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            walker: WalkerConfig::default(),
        }
    }
}

/// A hash request the updater is waiting for.
#[derive(Debug, Clone, Copy)]
struct PendingHash {
    index: EntryIndex,
    size: u64,
    modified: SystemTime,
}

/// Correlates hash tokens with storage entries and applies results.
///
/// This is the updater's [`HashStorageClient`]; it runs on hash workers.
struct PendingHashes {
    label: String,
    storage: Arc<DirectoryStorage>,
    requests: Mutex<HashMap<u64, PendingHash>>,
    next_token: AtomicU64,
}

impl PendingHashes {
    fn track(&self, index: EntryIndex, size: u64, modified: SystemTime) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.requests).insert(
            token,
            PendingHash {
                index,
                size,
                modified,
            },
        );
        token
    }

    fn forget(&self, token: u64) {
        lock(&self.requests).remove(&token);
    }

    fn is_waiting(&self, token: u64, index: EntryIndex) -> bool {
        lock(&self.requests)
            .get(&token)
            .is_some_and(|p| p.index == index)
    }

    /// Drop requests whose entries no longer exist.
    fn prune(&self) {
        lock(&self.requests).retain(|_, p| self.storage.entry(p.index).is_some());
    }

    fn len(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl HashStorageClient for PendingHashes {
    fn on_hash_ready(&self, ready: HashReady) {
        let Some(request) = lock(&self.requests).remove(&ready.token) else {
            log::debug!(
                "[{}] discarding hash for {}: unknown token {}",
                self.label,
                ready.path.display(),
                ready.token
            );
            return;
        };
        if ready.size != request.size || ready.modified != request.modified {
            log::debug!(
                "[{}] discarding stale hash for {}: file changed before hashing",
                self.label,
                ready.path.display()
            );
            return;
        }
        match self.storage.apply_hash(
            request.index,
            ready.token,
            request.size,
            request.modified,
            ready.hash,
        ) {
            Ok(true) => log::trace!("[{}] hashed {}", self.label, ready.path.display()),
            Ok(false) => log::debug!(
                "[{}] discarding stale hash for {}: entry changed since request",
                self.label,
                ready.path.display()
            ),
            Err(e) => log::debug!(
                "[{}] discarding hash for {}: {}",
                self.label,
                ready.path.display(),
                e
            ),
        }
    }

    fn on_hash_failed(&self, token: u64, path: &Path, error: &HashError) {
        // The entry keeps no hash and is requested again by the next scan.
        self.forget(token);
        log::debug!(
            "[{}] hash of {} failed, retrying next scan: {}",
            self.label,
            path.display(),
            error
        );
    }
}

/// Keeps the storage of one local share root in sync with the filesystem.
pub struct LocalDirectoryUpdater {
    name: String,
    root: PathBuf,
    storage: Arc<DirectoryStorage>,
    cache: HashCache,
    pending: Arc<PendingHashes>,
    config: LocalUpdaterConfig,
    last_sweep: Mutex<Option<Instant>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for LocalDirectoryUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDirectoryUpdater")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("entries", &self.storage.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LocalDirectoryUpdater {
    /// Create an updater with an empty storage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        cache: HashCache,
        config: LocalUpdaterConfig,
    ) -> Self {
        let name = name.into();
        let storage = Arc::new(DirectoryStorage::new(name.clone()));
        Self::with_storage(name, root, storage, cache, config)
    }

    /// Create an updater maintaining an existing (e.g. restored) storage.
    #[must_use]
    pub fn with_storage(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        storage: Arc<DirectoryStorage>,
        cache: HashCache,
        config: LocalUpdaterConfig,
    ) -> Self {
        let name = name.into();
        let pending = Arc::new(PendingHashes {
            label: name.clone(),
            storage: Arc::clone(&storage),
            requests: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        });
        Self {
            name,
            root: root.into(),
            storage,
            cache,
            pending,
            config,
            last_sweep: Mutex::new(None),
            shutdown: None,
        }
    }

    /// Stop scans early when `flag` is set. An interrupted scan never sweeps.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Share root on disk.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of hash requests not yet answered or discarded.
    #[must_use]
    pub fn pending_hashes(&self) -> usize {
        self.pending.len()
    }

    /// Walk the share root once and request hashes for changed files.
    pub fn scan(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut walker = Walker::new(&self.root, self.config.walker.clone());
        if let Some(flag) = &self.shutdown {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }

        // Directory chain of the current entry: (relative path, storage index).
        let mut parents: Vec<(String, Option<EntryIndex>)> = Vec::new();
        // Entries already claimed by an on-disk name during this scan.
        let mut seen: HashSet<EntryIndex> = HashSet::new();
        for item in walker.walk() {
            match item {
                Ok(walked) => self.visit(walked, &mut parents, &mut seen, &mut report),
                Err(e) => self.mark_unreadable(&e, &mut report),
            }
        }

        log::debug!(
            "[{}] scanned {} directories and {} files, {} hash requests",
            self.name,
            report.directories,
            report.files,
            report.hash_requests
        );
        report
    }

    /// Remove everything not confirmed since the previous sweep.
    pub fn sweep(&self) -> SweepStats {
        let stats = self.storage.sweep();
        self.pending.prune();
        *lock(&self.last_sweep) = Some(Instant::now());
        stats
    }

    fn sweep_due(&self) -> bool {
        lock(&self.last_sweep).is_none_or(|last| last.elapsed() >= self.config.sweep_interval)
    }

    fn interrupted(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn visit(
        &self,
        walked: WalkedEntry,
        parents: &mut Vec<(String, Option<EntryIndex>)>,
        seen: &mut HashSet<EntryIndex>,
        report: &mut TickReport,
    ) {
        if walked.depth == 0 {
            parents.clear();
            let root = self.storage.root();
            seen.insert(root);
            if walked.kind == WalkedKind::Directory {
                report.directories += 1;
                if let Err(e) = self.confirm_directory(root, walked.modified) {
                    log::warn!("[{}] cannot update share root: {}", self.name, e);
                }
                parents.push((String::new(), Some(root)));
            } else {
                log::warn!(
                    "[{}] share root {} is not a directory",
                    self.name,
                    walked.path.display()
                );
                report.unreadable += 1;
                let _ = self.storage.set_update_status(root, UpdateStatus::Stale);
            }
            return;
        }

        parents.truncate(walked.depth);
        let parent_rel = walked.rel_path.rsplit_once('/').map_or("", |(p, _)| p);
        let mut parent = match parents.get(walked.depth - 1) {
            Some((rel, index)) if rel == parent_rel => *index,
            _ => None,
        };
        if let Some(existing) = parent.and_then(|p| self.storage.child(p, &walked.name)) {
            if seen.contains(&existing) {
                // Two names on disk that normalize to the same entry name.
                log::warn!(
                    "[{}] skipping {}: its name collides with another entry named '{}'",
                    self.name,
                    walked.path.display(),
                    walked.rel_path
                );
                report.unreadable += 1;
                parent = None;
            }
        }

        match walked.kind {
            WalkedKind::Directory => {
                report.directories += 1;
                let index = parent.and_then(|parent| {
                    resolve_child(&self.storage, parent, &walked.name, EntryType::Directory)
                        .and_then(|index| {
                            self.confirm_directory(index, walked.modified)?;
                            seen.insert(index);
                            Ok(index)
                        })
                        .map_err(|e| {
                            log::warn!("[{}] cannot index {}: {}", self.name, walked.rel_path, e);
                        })
                        .ok()
                });
                parents.push((walked.rel_path, index));
            }
            WalkedKind::File { size } => {
                report.files += 1;
                let Some(parent) = parent else {
                    return;
                };
                match self.visit_file(parent, &walked, size, report) {
                    Ok(index) => {
                        seen.insert(index);
                    }
                    Err(e) => {
                        log::warn!("[{}] cannot index {}: {}", self.name, walked.rel_path, e);
                    }
                }
            }
        }
    }

    fn visit_file(
        &self,
        parent: EntryIndex,
        walked: &WalkedEntry,
        size: u64,
        report: &mut TickReport,
    ) -> StorageResult<EntryIndex> {
        let index = resolve_child(&self.storage, parent, &walked.name, EntryType::File)?;
        self.storage
            .set_update_status(index, UpdateStatus::Confirmed)?;
        let Some(entry) = self.storage.entry(index) else {
            return Ok(index);
        };

        let unchanged = entry.size() == Some(size) && entry.last_modified == walked.modified;
        if unchanged && entry.hash().is_some() {
            return Ok(index);
        }
        if unchanged
            && entry
                .hash_request_id()
                .is_some_and(|token| self.pending.is_waiting(token, index))
        {
            return Ok(index);
        }

        self.storage
            .update_file_metadata(index, size, walked.modified, None)?;
        let token = self.pending.track(index, size, walked.modified);
        // Recorded before the request: the callback may run before it returns.
        self.storage.set_hash_request(index, Some(token))?;

        let client: Arc<dyn HashStorageClient> = self.pending.clone();
        match self.cache.request_hash(token, &walked.path, size, client) {
            Ok(()) => {
                report.hash_requests += 1;
                log::trace!("[{}] requested hash of {}", self.name, walked.rel_path);
            }
            Err(e) => {
                self.pending.forget(token);
                self.storage.set_hash_request(index, None)?;
                report.unreadable += 1;
                log::warn!("[{}] {}", self.name, e);
            }
        }
        Ok(index)
    }

    fn confirm_directory(&self, index: EntryIndex, modified: SystemTime) -> StorageResult<()> {
        self.storage.set_directory_modified(index, modified)?;
        self.storage.set_update_status(index, UpdateStatus::Confirmed)
    }

    /// Keep the subtree of a path that exists but could not be read.
    fn mark_unreadable(&self, error: &ScanError, report: &mut TickReport) {
        let rel = path_utils::relative_to(&self.root, error.path());
        let is_root = rel.as_deref() == Some("");
        if matches!(error, ScanError::NotFound(_)) && !is_root {
            return;
        }
        report.unreadable += 1;
        if let Some(index) = rel.as_deref().and_then(|r| self.storage.lookup(r)) {
            if self
                .storage
                .set_update_status(index, UpdateStatus::Stale)
                .is_ok()
            {
                log::debug!(
                    "[{}] keeping unreadable '{}' until it can be listed again",
                    self.name,
                    rel.as_deref().unwrap_or_default()
                );
            }
        }
    }
}

impl DirectoryUpdater for LocalDirectoryUpdater {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage(&self) -> &Arc<DirectoryStorage> {
        &self.storage
    }

    fn tick(&self) -> TickReport {
        let mut report = self.scan();
        if self.interrupted() {
            log::debug!("[{}] scan interrupted, skipping sweep", self.name);
            return report;
        }
        if self.sweep_due() {
            report.swept = Some(self.sweep());
        }
        report
    }

    fn tick_interval(&self) -> Duration {
        self.config.scan_interval
    }
}
