//! Request/callback hashing service.
//!
//! [`HashCache::request_hash`] only stats the file on the caller's thread.
//! Cache hits and computations are both completed on a dedicated rayon pool,
//! so a client callback never runs on the thread that issued the request.

use lru::LruCache;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::entry::{CacheEntry, CacheKey, HashCacheSnapshot, CACHE_SNAPSHOT_VERSION};
use super::{CacheError, CacheResult, HashRequestError};
use crate::scanner::hasher::DEFAULT_MMAP_THRESHOLD;
use crate::scanner::{Hash, HashError, Hasher};

/// Result delivered to a [`HashStorageClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashReady {
    /// Token supplied with the request
    pub token: u64,
    /// Path that was hashed
    pub path: PathBuf,
    /// Content hash
    pub hash: Hash,
    /// Size the hash is valid for
    pub size: u64,
    /// Modification time the hash is valid for
    pub modified: SystemTime,
}

/// Receiver of hash results.
///
/// Implementations must be cheap and must not block: they run on a hashing
/// worker.
pub trait HashStorageClient: Send + Sync {
    /// Called exactly once for each accepted request whose hash was obtained.
    fn on_hash_ready(&self, ready: HashReady);

    /// Called instead of [`Self::on_hash_ready`] when hashing failed.
    fn on_hash_failed(&self, token: u64, path: &Path, error: &HashError) {
        let _ = (token, path, error);
    }
}

/// Settings for a [`HashCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCacheConfig {
    /// Number of hashing worker threads
    pub max_concurrent_hashes: usize,
    /// Maximum number of cached records; `None` keeps every valid record
    pub max_records: Option<usize>,
    /// File size from which content is memory-mapped
    pub mmap_threshold: u64,
}

impl Default for HashCacheConfig {
    fn default() -> Self {
        Self {
            max_concurrent_hashes: 4,
            max_records: None,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from a cached record
    pub hits: u64,
    /// Requests that started a computation
    pub misses: u64,
    /// Requests that joined a computation already in flight
    pub coalesced: u64,
    /// Computations that failed
    pub failures: u64,
    /// Records currently cached
    pub records: usize,
}

struct Waiter {
    token: u64,
    client: Arc<dyn HashStorageClient>,
}

struct Inner {
    records: Mutex<LruCache<PathBuf, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, Vec<Waiter>>>,
    pool: rayon::ThreadPool,
    hasher: Hasher,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
    /// Accepted requests whose callback has not returned yet.
    outstanding: Mutex<usize>,
    idle: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn begin(&self) {
        *lock(&self.outstanding) += 1;
    }

    fn finish(&self, count: usize) {
        let mut outstanding = lock(&self.outstanding);
        *outstanding = outstanding.saturating_sub(count);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn compute(&self, key: CacheKey) {
        let result = self.hasher.full_hash(&key.path).and_then(|hash| {
            // Content read from a file modified mid-hash is not valid for `key`.
            match fs::metadata(&key.path) {
                Ok(meta) if meta.len() == key.size && meta.modified().ok() == Some(key.mtime) => {
                    Ok(hash)
                }
                Ok(_) => Err(HashError::from_io(
                    &key.path,
                    io::Error::other("file changed while hashing"),
                )),
                Err(e) => Err(HashError::from_io(&key.path, e)),
            }
        });

        if let Ok(hash) = result {
            lock(&self.records).put(
                key.path.clone(),
                CacheEntry {
                    path: key.path.clone(),
                    size: key.size,
                    mtime: key.mtime,
                    hash,
                },
            );
        }

        let waiters = lock(&self.in_flight).remove(&key).unwrap_or_default();
        let count = waiters.len();
        match result {
            Ok(hash) => {
                log::trace!("Hashed {} ({} waiters)", key.path.display(), count);
                for waiter in waiters {
                    waiter.client.on_hash_ready(HashReady {
                        token: waiter.token,
                        path: key.path.clone(),
                        hash,
                        size: key.size,
                        modified: key.mtime,
                    });
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to hash {}: {}", key.path.display(), e);
                for waiter in waiters {
                    waiter.client.on_hash_failed(waiter.token, &key.path, &e);
                }
            }
        }
        self.finish(count);
    }
}

/// Asynchronous, memoizing content hasher shared by all local updaters.
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct HashCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl HashCache {
    /// Create a cache and start its worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ThreadPool`] if the workers cannot be spawned.
    pub fn new(config: HashCacheConfig) -> CacheResult<Self> {
        let threads = config.max_concurrent_hashes.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hash-{i}"))
            .build()
            .map_err(|e| CacheError::ThreadPool(e.to_string()))?;

        let records = match config.max_records.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        log::debug!(
            "Hash cache started with {} workers (record limit: {:?})",
            threads,
            config.max_records
        );

        Ok(Self {
            inner: Arc::new(Inner {
                records: Mutex::new(records),
                in_flight: Mutex::new(HashMap::new()),
                pool,
                hasher: Hasher::new().with_mmap_threshold(config.mmap_threshold),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
            }),
        })
    }

    /// Ask for the hash of `path`; the result arrives through `client`.
    ///
    /// Only the file metadata is read here. If the observed size differs
    /// from `expected_size` the observed metadata wins and the callback
    /// reports it.
    ///
    /// # Errors
    ///
    /// [`HashRequestError::FileUnreadable`] if the path cannot be stat'ed or
    /// is not a regular file. No callback follows a rejected request.
    pub fn request_hash(
        &self,
        token: u64,
        path: &Path,
        expected_size: u64,
        client: Arc<dyn HashStorageClient>,
    ) -> Result<(), HashRequestError> {
        let unreadable = |source| HashRequestError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let meta = fs::metadata(path).map_err(unreadable)?;
        if !meta.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let mtime = meta.modified().map_err(unreadable)?;
        let size = meta.len();
        if size != expected_size {
            log::debug!(
                "Size of {} changed before hashing ({} -> {})",
                path.display(),
                expected_size,
                size
            );
        }

        let key = CacheKey {
            path: path.to_path_buf(),
            size,
            mtime,
        };
        let waiter = Waiter { token, client };
        self.inner.begin();

        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(waiters) = in_flight.get_mut(&key) {
            waiters.push(waiter);
            self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let cached = lock(&self.inner.records)
            .get(&key.path)
            .filter(|e| e.matches(size, mtime))
            .map(|e| e.hash);
        if let Some(hash) = cached {
            drop(in_flight);
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(&self.inner);
            self.inner.pool.spawn(move || {
                waiter.client.on_hash_ready(HashReady {
                    token: waiter.token,
                    path: key.path,
                    hash,
                    size,
                    modified: mtime,
                });
                inner.finish(1);
            });
            return Ok(());
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(key.clone(), vec![waiter]);
        drop(in_flight);
        let inner = Arc::clone(&self.inner);
        self.inner.pool.spawn(move || inner.compute(key));
        Ok(())
    }

    /// Block until every accepted request has been answered or `timeout`
    /// elapses. Returns `true` if the cache is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = lock(&self.inner.outstanding);
        let (guard, _) = self
            .inner
            .idle
            .wait_timeout_while(guard, timeout, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }

    /// Cached record for `path`, without touching its recency.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        lock(&self.inner.records).peek(path).cloned()
    }

    /// Drop the record for `path`. Returns whether one existed.
    pub fn evict(&self, path: &Path) -> bool {
        lock(&self.inner.records).pop(path).is_some()
    }

    /// Drop every record.
    pub fn clear(&self) {
        lock(&self.inner.records).clear();
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.records).len()
    }

    /// Whether no record is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            records: self.len(),
        }
    }

    /// Copy all records, most recently used first.
    #[must_use]
    pub fn serialize(&self) -> HashCacheSnapshot {
        let records = lock(&self.inner.records);
        HashCacheSnapshot::new(records.iter().map(|(_, e)| e.clone()).collect())
    }

    /// Merge the records of `snapshot` into this cache, keeping its recency
    /// order. Returns the number of records inserted.
    ///
    /// # Errors
    ///
    /// [`CacheError::Corrupt`] if the snapshot version is unsupported.
    pub fn restore(&self, snapshot: HashCacheSnapshot) -> CacheResult<usize> {
        if snapshot.version != CACHE_SNAPSHOT_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, CACHE_SNAPSHOT_VERSION
            )));
        }
        let count = snapshot.entries.len();
        let mut records = lock(&self.inner.records);
        for entry in snapshot.entries.into_iter().rev() {
            records.put(entry.path.clone(), entry);
        }
        log::debug!("Restored {} hash cache records", count);
        Ok(count)
    }
}
