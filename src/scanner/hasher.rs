//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//!
//! This module provides the [`Hasher`] struct for computing BLAKE3 hashes
//! of whole file contents. Small files are streamed through a fixed-size
//! buffer; files above the configured threshold are memory-mapped and hashed
//! with rayon parallelism.
//!
//! The digest is the content identity of a shared file: two peers holding
//! the same bytes advertise the same [`Hash`].
//!
//! # Example
//!
//! ```no_run
//! use sharelist::scanner::{hash_to_hex, Hasher};
//! use std::path::Path;
//!
//! let hasher = Hasher::new();
//! let hash = hasher.full_hash(Path::new("movie.mkv")).unwrap();
//! println!("{}", hash_to_hex(&hash));
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use super::HashError;

/// A 32-byte BLAKE3 digest.
pub type Hash = [u8; 32];

/// Length in bytes of a [`Hash`].
pub const HASH_LEN: usize = 32;

/// Buffer size for streaming reads.
const BUFFER_SIZE: usize = 64 * 1024;

/// Default size above which files are memory-mapped (64 MiB).
pub const DEFAULT_MMAP_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Whole-file content hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    /// Use memory mapping for files at or above `mmap_threshold`.
    use_mmap: bool,
    /// Size in bytes from which memory mapping is used.
    mmap_threshold: u64,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with memory mapping enabled at the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            use_mmap: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }

    /// Enable or disable memory-mapped hashing.
    #[must_use]
    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    /// Set the file size from which memory mapping is used.
    #[must_use]
    pub fn with_mmap_threshold(mut self, threshold: u64) -> Self {
        self.mmap_threshold = threshold;
        self
    }

    /// Compute the BLAKE3 hash of the entire file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read. A file
    /// that cannot be mapped falls back to streaming.
    pub fn full_hash(&self, path: &Path) -> Result<Hash, HashError> {
        let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;

        if self.use_mmap {
            let len = file
                .metadata()
                .map_err(|e| HashError::from_io(path, e))?
                .len();
            if len > 0 && len >= self.mmap_threshold {
                match Self::hash_mmap(&file) {
                    Ok(hash) => return Ok(hash),
                    Err(e) => {
                        log::debug!(
                            "Memory mapping failed for {}, streaming instead: {}",
                            path.display(),
                            e
                        );
                    }
                }
            }
        }

        Self::hash_stream(&mut file).map_err(|e| HashError::from_io(path, e))
    }

    fn hash_mmap(file: &File) -> io::Result<Hash> {
        // SAFETY: the map is read-only and dropped before returning. A file
        // truncated concurrently may raise SIGBUS on some platforms; callers
        // re-validate size and mtime before trusting the digest.
        let map = unsafe { memmap2::Mmap::map(file)? };
        let mut hasher = blake3::Hasher::new();
        hasher.update_rayon(&map);
        Ok(*hasher.finalize().as_bytes())
    }

    fn hash_stream(file: &mut File) -> io::Result<Hash> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }
        Ok(*hasher.finalize().as_bytes())
    }
}

impl HashError {
    pub(crate) fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: Arc::new(error),
            },
        }
    }
}

/// Format a hash as lowercase hex.
#[must_use]
pub fn hash_to_hex(hash: &Hash) -> String {
    blake3::Hash::from(*hash).to_hex().to_string()
}

/// Parse a 64-character hex string into a hash.
///
/// Returns `None` for strings of the wrong length or with non-hex characters.
#[must_use]
pub fn hex_to_hash(hex: &str) -> Option<Hash> {
    blake3::Hash::from_hex(hex).ok().map(|h| *h.as_bytes())
}
