//! Scanner module for share traversal and content hashing.
//!
//! This module provides functionality for:
//! - Depth-first traversal of a share root using walkdir
//! - Content hashing with BLAKE3
//! - Unicode name normalization
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Share traversal and entry discovery
//! - [`hasher`]: BLAKE3 file hashing (streaming or memory-mapped)
//! - [`path_utils`]: NFC names and relative path handling

pub mod hasher;
pub mod path_utils;
pub mod walker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

// Re-export main types
pub use hasher::{hash_to_hex, hex_to_hash, Hash, Hasher, HASH_LEN};
pub use walker::Walker;

/// Kind of an entry discovered by the [`Walker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkedKind {
    /// A directory
    Directory,
    /// A regular, non-empty file
    File {
        /// File size in bytes
        size: u64,
    },
}

/// A filesystem entry discovered below a share root.
#[derive(Debug, Clone)]
pub struct WalkedEntry {
    /// Absolute path on disk
    pub path: PathBuf,
    /// `/`-separated path relative to the share root (empty for the root)
    pub rel_path: String,
    /// NFC-normalized final path segment (empty for the root)
    pub name: String,
    /// Distance from the share root (0 for the root)
    pub depth: usize,
    /// Directory or file
    pub kind: WalkedKind,
    /// Last modification time
    pub modified: SystemTime,
}

/// Configuration for share traversal.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    /// Loops are detected and reported as errors.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Glob patterns to ignore (gitignore-style), relative to the share root.
    pub ignore_patterns: Vec<String>,
}

impl WalkerConfig {
    /// Create a new walker configuration.
    #[must_use]
    pub fn new(follow_symlinks: bool, skip_hidden: bool, ignore_patterns: Vec<String>) -> Self {
        Self {
            follow_symlinks,
            skip_hidden,
            ignore_patterns,
        }
    }
}

/// Errors that can occur during share traversal.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The path vanished while it was being scanned.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// The path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug, Clone)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: Arc<std::io::Error>,
    },
}
