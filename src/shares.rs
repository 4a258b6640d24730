//! Wiring of the indexer: one hash cache, one local updater per share root
//! and one remote updater per peer.
//!
//! Each share root is published under a virtual name, the final component of
//! its path (`/home/me/Music` becomes `Music`). Clashing names get a numeric
//! suffix (`Music-2`). Exported listings and [`Shares::lookup`] use paths
//! prefixed with that name.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheDatabase, CacheError, CacheStats, HashCache};
use crate::config::Config;
use crate::listing::{ListingRecord, ListingSource, PeerId};
use crate::scanner::{path_utils, Hash};
use crate::storage::{DirectoryStorage, StorageSnapshot};
use crate::updater::{
    DirectoryUpdater, LocalDirectoryUpdater, LocalUpdaterConfig, RemoteDirectoryUpdater,
    TickReport, TickingThread,
};

/// File name of the hash cache database inside a data directory.
pub const CACHE_DB_FILE: &str = "hashes.db";

/// Make `name` unique among `taken` by appending `-2`, `-3`, ...
fn unique_name(name: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&name) {
        return name;
    }
    (2..)
        .map(|n| format!("{name}-{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(name)
}

/// Virtual name of a share root.
fn share_name(root: &Path) -> String {
    root.file_name()
        .map(path_utils::os_name)
        .filter(|n| path_utils::is_valid_name(n))
        .unwrap_or_else(|| "share".to_string())
}

/// File-system safe form of a name used in snapshot file names.
///
/// Names that had to be rewritten get a short hash of the original, so two
/// names sanitizing to the same text keep separate files.
fn file_stem(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == name {
        sanitized
    } else {
        let digest = blake3::hash(name.as_bytes()).to_hex();
        format!("{}-{}", sanitized, &digest.as_str()[..8])
    }
}

/// The indexer: local shares, remote mirrors and their scheduling.
pub struct Shares {
    cache: HashCache,
    local_config: LocalUpdaterConfig,
    remote_interval: Duration,
    shutdown: Arc<AtomicBool>,
    locals: Vec<Arc<LocalDirectoryUpdater>>,
    remotes: Vec<Arc<RemoteDirectoryUpdater>>,
    threads: Vec<TickingThread>,
}

impl std::fmt::Debug for Shares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shares")
            .field("shares", &self.share_names())
            .field("peers", &self.remotes.iter().map(|r| r.peer()).collect::<Vec<_>>())
            .field("running", &!self.threads.is_empty())
            .finish_non_exhaustive()
    }
}

impl Shares {
    /// Build the cache and one local updater per configured share root.
    ///
    /// Scans stop early when `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ThreadPool`] if the hashing workers cannot start.
    pub fn new(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Self, CacheError> {
        let cache = HashCache::new(config.hash_cache_config())?;
        let mut shares = Self {
            cache,
            local_config: config.local_updater_config(),
            remote_interval: config.remote_interval(),
            shutdown,
            locals: Vec::new(),
            remotes: Vec::new(),
            threads: Vec::new(),
        };

        let mut taken = HashSet::new();
        for root in &config.share_roots {
            let name = unique_name(share_name(root), &taken);
            taken.insert(name.clone());
            log::info!("Sharing {} as '{}'", root.display(), name);
            let storage = Arc::new(DirectoryStorage::new(name.clone()));
            shares.locals.push(shares.local_updater(name, root.clone(), storage));
        }
        Ok(shares)
    }

    fn local_updater(
        &self,
        name: String,
        root: PathBuf,
        storage: Arc<DirectoryStorage>,
    ) -> Arc<LocalDirectoryUpdater> {
        Arc::new(
            LocalDirectoryUpdater::with_storage(
                name,
                root,
                storage,
                self.cache.clone(),
                self.local_config.clone(),
            )
            .with_shutdown_flag(Arc::clone(&self.shutdown)),
        )
    }

    /// Virtual names of the local shares, in configuration order.
    #[must_use]
    pub fn share_names(&self) -> Vec<&str> {
        self.locals.iter().map(|u| u.name()).collect()
    }

    /// Storage of the local share called `name`.
    #[must_use]
    pub fn local_storage(&self, name: &str) -> Option<&Arc<DirectoryStorage>> {
        self.locals
            .iter()
            .find(|u| u.name() == name)
            .map(|u| u.storage())
    }

    /// Mirror of `peer`, if the peer was added.
    #[must_use]
    pub fn remote_storage(&self, peer: &PeerId) -> Option<&Arc<DirectoryStorage>> {
        self.remotes
            .iter()
            .find(|u| u.peer() == peer)
            .map(|u| u.storage())
    }

    /// The shared hash cache.
    #[must_use]
    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    /// Hash cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Mirror the listing of `peer` fetched from `source`.
    ///
    /// If the updaters are running, the new peer starts ticking immediately.
    ///
    /// # Errors
    ///
    /// Fails if the peer was already added or its thread cannot be spawned.
    pub fn add_remote_peer(&mut self, peer: PeerId, source: Arc<dyn ListingSource>) -> Result<()> {
        if self.remote_storage(&peer).is_some() {
            bail!("Peer {peer} is already mirrored");
        }
        let updater = Arc::new(RemoteDirectoryUpdater::new(
            peer.clone(),
            source,
            self.remote_interval,
        ));
        if !self.threads.is_empty() {
            self.threads.push(
                TickingThread::spawn(updater.clone(), Arc::clone(&self.shutdown))
                    .with_context(|| format!("Failed to start updater for peer {peer}"))?,
            );
        }
        log::info!("Mirroring peer {}", peer);
        self.remotes.push(updater);
        Ok(())
    }

    fn updaters(&self) -> impl Iterator<Item = Arc<dyn DirectoryUpdater>> + '_ {
        let locals = self
            .locals
            .iter()
            .map(|u| Arc::clone(u) as Arc<dyn DirectoryUpdater>);
        let remotes = self
            .remotes
            .iter()
            .map(|u| Arc::clone(u) as Arc<dyn DirectoryUpdater>);
        locals.chain(remotes)
    }

    /// Start one ticking thread per updater.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned; threads already started keep
    /// running until [`Self::stop`].
    pub fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Ok(());
        }
        let updaters: Vec<_> = self.updaters().collect();
        for updater in updaters {
            let name = updater.name().to_string();
            let thread = TickingThread::spawn(updater, Arc::clone(&self.shutdown))
                .with_context(|| format!("Failed to start updater '{name}'"))?;
            self.threads.push(thread);
        }
        log::debug!("Started {} updater threads", self.threads.len());
        Ok(())
    }

    /// Stop all ticking threads, waiting for running ticks to finish.
    pub fn stop(&mut self) {
        for thread in &mut self.threads {
            thread.stop();
        }
        self.threads.clear();
    }

    /// Run one tick of every updater on the calling thread.
    ///
    /// While threads are running, updaters that are mid-tick are skipped.
    pub fn tick_all(&self) -> TickReport {
        let mut total = TickReport::default();
        if self.threads.is_empty() {
            for updater in self.updaters() {
                total.merge(&updater.tick());
            }
        } else {
            for report in self.threads.iter().filter_map(TickingThread::tick_now) {
                total.merge(&report);
            }
        }
        total
    }

    /// Wait until every requested hash has been delivered.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_hashes(&self, timeout: Duration) -> bool {
        self.cache.wait_idle(timeout)
    }

    /// Listing of all hashed local files, paths prefixed with the share name.
    #[must_use]
    pub fn export_local_listing(&self) -> Vec<ListingRecord> {
        self.locals
            .iter()
            .flat_map(|updater| {
                let name = updater.name().to_string();
                updater
                    .storage()
                    .export_listing()
                    .into_iter()
                    .map(move |mut record| {
                        record.path = path_utils::join(&name, &record.path);
                        record
                    })
            })
            .collect()
    }

    /// Hash and size of a local file addressed as `<share>/<path>`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<(Hash, u64)> {
        let (share, rest) = path.split_once('/')?;
        self.local_storage(share)?.file_info(rest)
    }

    /// Every local file with content `hash`, as `<share>/<path>`.
    #[must_use]
    pub fn find_by_hash(&self, hash: &Hash) -> Vec<PathBuf> {
        self.locals
            .iter()
            .flat_map(|u| {
                let name = PathBuf::from(u.name());
                u.storage()
                    .find_by_hash(hash)
                    .into_iter()
                    .map(move |p| name.join(p))
            })
            .collect()
    }

    fn local_snapshot_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("local-{}.json", file_stem(name)))
    }

    fn remote_snapshot_path(dir: &Path, peer: &PeerId) -> PathBuf {
        dir.join(format!("peer-{}.json", file_stem(&peer.0)))
    }

    /// Save every storage snapshot and the hash cache into `dir`.
    ///
    /// # Errors
    ///
    /// Fails on the first snapshot or database that cannot be written.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;

        for updater in &self.locals {
            let path = Self::local_snapshot_path(dir, updater.name());
            updater.storage().serialize().save(&path)?;
        }
        for updater in &self.remotes {
            let path = Self::remote_snapshot_path(dir, updater.peer());
            updater.storage().serialize().save(&path)?;
        }

        let db_path = dir.join(CACHE_DB_FILE);
        let mut db = CacheDatabase::open(&db_path)
            .with_context(|| format!("Failed to open hash cache: {}", db_path.display()))?;
        db.save(&self.cache.serialize())
            .context("Failed to save hash cache")?;
        db.close()?;

        log::info!(
            "Saved {} local and {} remote snapshots to {}",
            self.locals.len(),
            self.remotes.len(),
            dir.display()
        );
        Ok(())
    }

    /// Restore snapshots and the hash cache saved by [`Self::save`].
    ///
    /// Missing files are skipped. A corrupt snapshot is logged and the
    /// affected share starts empty. Returns the number of storages restored.
    ///
    /// # Errors
    ///
    /// Fails if called while the updaters are running.
    pub fn load(&mut self, dir: &Path) -> Result<usize> {
        if !self.threads.is_empty() {
            bail!("Cannot load snapshots while updaters are running");
        }

        let db_path = dir.join(CACHE_DB_FILE);
        if db_path.is_file() {
            match CacheDatabase::open(&db_path).and_then(|db| db.load()) {
                Ok(snapshot) => match self.cache.restore(snapshot) {
                    Ok(n) => log::debug!("Restored {} cached hashes", n),
                    Err(e) => log::warn!("Ignoring hash cache: {}", e),
                },
                Err(e) => log::warn!("Ignoring hash cache {}: {}", db_path.display(), e),
            }
        }

        let mut restored = 0;
        for i in 0..self.locals.len() {
            let name = self.locals[i].name().to_string();
            let Some(storage) = Self::restore_storage(&Self::local_snapshot_path(dir, &name)) else {
                continue;
            };
            let root = self.locals[i].root().to_path_buf();
            let updater = self.local_updater(name, root, storage);
            self.locals[i] = updater;
            restored += 1;
        }
        for i in 0..self.remotes.len() {
            let peer = self.remotes[i].peer().clone();
            let Some(storage) = Self::restore_storage(&Self::remote_snapshot_path(dir, &peer))
            else {
                continue;
            };
            let updater = RemoteDirectoryUpdater::with_storage(
                peer,
                storage,
                self.remotes[i].source(),
                self.remote_interval,
            );
            self.remotes[i] = Arc::new(updater);
            restored += 1;
        }
        Ok(restored)
    }

    fn restore_storage(path: &Path) -> Option<Arc<DirectoryStorage>> {
        if !path.is_file() {
            return None;
        }
        let result = StorageSnapshot::load(path).and_then(|snapshot| {
            DirectoryStorage::restore(snapshot).map_err(anyhow::Error::from)
        });
        match result {
            Ok(storage) => {
                log::debug!(
                    "Restored '{}' ({} entries) from {}",
                    storage.label(),
                    storage.len(),
                    path.display()
                );
                Some(Arc::new(storage))
            }
            Err(e) => {
                log::warn!("Ignoring snapshot {}: {:#}", path.display(), e);
                None
            }
        }
    }
}

impl Drop for Shares {
    fn drop(&mut self) {
        self.stop();
    }
}
