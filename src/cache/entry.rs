//! Cache entry definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::scanner::Hash;

/// Current version of the hash cache snapshot format.
pub const CACHE_SNAPSHOT_VERSION: u32 = 1;

/// A computed hash and the file metadata it is valid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Absolute path of the file
    pub path: PathBuf,
    /// File size when hashed
    pub size: u64,
    /// Modification time when hashed
    pub mtime: SystemTime,
    /// BLAKE3 hash of the whole content
    pub hash: Hash,
}

impl CacheEntry {
    /// Whether this entry is valid for a file with the given metadata.
    ///
    /// Both size and modification time must match exactly.
    #[must_use]
    pub fn matches(&self, size: u64, mtime: SystemTime) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// Identity of one hash computation: at most one runs per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Absolute path
    pub path: PathBuf,
    /// Observed size
    pub size: u64,
    /// Observed modification time
    pub mtime: SystemTime,
}

/// Serializable content of a hash cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCacheSnapshot {
    /// Format version.
    pub version: u32,
    /// Entries, most recently used first.
    pub entries: Vec<CacheEntry>,
}

impl HashCacheSnapshot {
    /// Create a snapshot at the current version.
    #[must_use]
    pub fn new(entries: Vec<CacheEntry>) -> Self {
        Self {
            version: CACHE_SNAPSHOT_VERSION,
            entries,
        }
    }
}

/// Split a timestamp into seconds and nanoseconds relative to the Unix epoch.
///
/// Times before the epoch yield negative seconds with a positive nanosecond
/// remainder, so `(secs, nanos)` always means `secs + nanos / 1e9`.
#[must_use]
pub fn time_to_parts(time: SystemTime) -> (i64, u32) {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos()),
        Err(e) => {
            let d = e.duration();
            let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
            match d.subsec_nanos() {
                0 => (-secs, 0),
                n => (-secs - 1, 1_000_000_000 - n),
            }
        }
    }
}

/// Inverse of [`time_to_parts`].
#[must_use]
pub fn time_from_parts(secs: i64, nanos: u32) -> SystemTime {
    let base = if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    };
    base + Duration::from_nanos(u64::from(nanos))
}
