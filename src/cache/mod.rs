//! Hash Cache: asynchronous content hashing with memoization.
//!
//! Callers submit [`HashCache::request_hash`] and receive the result later
//! through a [`HashStorageClient`] callback invoked on a worker thread.
//!
//! # Architecture
//!
//! * [`service`]: the request/callback service, worker pool and LRU records.
//! * [`entry`]: cached records, coalescing keys and the snapshot format.
//! * [`database`]: SQLite persistence of snapshots.
//!
//! # Cache Invalidation
//!
//! A record is valid for a file while its size and modification time both
//! match the values observed when it was hashed. A content change that keeps
//! both unchanged is served from the cache.

pub mod database;
pub mod entry;
pub mod service;

use std::path::PathBuf;

pub use database::CacheDatabase;
pub use entry::{CacheEntry, CacheKey, HashCacheSnapshot, CACHE_SNAPSHOT_VERSION};
pub use service::{CacheStats, HashCache, HashCacheConfig, HashReady, HashStorageClient};

/// Errors from cache persistence and setup.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// SQLite reported an error.
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored content is invalid or has an unsupported version.
    #[error("Corrupt hash cache: {0}")]
    Corrupt(String),

    /// The hashing worker pool could not be started.
    #[error("Failed to start hashing workers: {0}")]
    ThreadPool(String),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Rejection of a hash request at submission time.
///
/// A rejected request never produces a callback.
#[derive(thiserror::Error, Debug)]
pub enum HashRequestError {
    /// The path cannot be stat'ed or is not a regular file.
    #[error("Cannot hash {path}: {source}")]
    FileUnreadable {
        /// Requested path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}
