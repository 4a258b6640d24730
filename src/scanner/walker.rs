//! Share root walker built on walkdir.
//!
//! # Overview
//!
//! [`Walker`] traverses one share root depth-first, children sorted by file
//! name, and yields every directory and non-empty regular file as a
//! [`WalkedEntry`]. The root itself is yielded first with depth 0. Depths let
//! the caller keep a stack of parent directories without re-resolving paths.
//!
//! Unreadable entries are yielded as [`ScanError`] values and iteration
//! continues with the next sibling.
//!
//! # Example
//!
//! ```no_run
//! use sharelist::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/srv/share"), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(e) => println!("{} (depth {})", e.rel_path, e.depth),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use super::path_utils;
use super::{ScanError, WalkedEntry, WalkedKind, WalkerConfig};

/// Depth-first walker over one share root.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given share root.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The share root this walker traverses.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build the ignore matcher from configured patterns.
    fn build_gitignore(&self) -> Option<Gitignore> {
        if self.config.ignore_patterns.is_empty() {
            return None;
        }
        let mut builder = GitignoreBuilder::new(&self.root);
        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }
        match builder.build() {
            Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Walk the share root.
    ///
    /// Yields the root first, then every directory and non-empty file in
    /// pre-order with children sorted by name.
    pub fn walk(&self) -> impl Iterator<Item = Result<WalkedEntry, ScanError>> + '_ {
        let gitignore = self.build_gitignore();
        let skip_hidden = self.config.skip_hidden;
        let root = self.root.clone();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if skip_hidden && entry.file_name().to_string_lossy().starts_with('.') {
                    log::trace!("Skipping hidden entry: {}", entry.path().display());
                    return false;
                }
                if let Some(gi) = &gitignore {
                    let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                    if gi.matched(rel, entry.file_type().is_dir()).is_ignore() {
                        log::trace!("Ignoring: {}", entry.path().display());
                        return false;
                    }
                }
                true
            });

        walk_dir
            .take_while(move |_| {
                let stop = self.is_shutdown_requested();
                if stop {
                    log::debug!("Walker: Shutdown requested, stopping iteration");
                }
                !stop
            })
            .filter_map(move |entry_result| match entry_result {
                Ok(entry) => self.process_entry(&entry),
                Err(e) => Some(Err(self.convert_error(e))),
            })
    }

    fn process_entry(&self, entry: &walkdir::DirEntry) -> Option<Result<WalkedEntry, ScanError>> {
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_symlink() && !self.config.follow_symlinks {
            log::trace!("Skipping symlink: {}", path.display());
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => return Some(Err(self.convert_error(e))),
        };

        let rel_path = path_utils::relative_to(&self.root, path)?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = if entry.depth() == 0 {
            String::new()
        } else {
            path_utils::os_name(entry.file_name())
        };

        let kind = if metadata.is_dir() {
            WalkedKind::Directory
        } else if metadata.is_file() {
            let size = metadata.len();
            if size == 0 {
                log::debug!("Skipping empty file: {}", path.display());
                return None;
            }
            WalkedKind::File { size }
        } else {
            log::trace!("Skipping special file: {}", path.display());
            return None;
        };

        Some(Ok(WalkedEntry {
            path: path.to_path_buf(),
            rel_path,
            name,
            depth: entry.depth(),
            kind,
            modified,
        }))
    }

    fn convert_error(&self, error: walkdir::Error) -> ScanError {
        use std::io::ErrorKind;

        let path = error
            .path()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);

        if error.loop_ancestor().is_some() {
            log::warn!("Symlink loop at {}", path.display());
            return ScanError::Io {
                path,
                source: std::io::Error::other("filesystem loop"),
            };
        }

        match error.io_error().map(std::io::Error::kind) {
            Some(ErrorKind::PermissionDenied) => {
                log::warn!("Permission denied: {}", path.display());
                ScanError::PermissionDenied(path)
            }
            Some(ErrorKind::NotFound) => {
                log::debug!("Path vanished during scan: {}", path.display());
                ScanError::NotFound(path)
            }
            _ => {
                log::warn!("I/O error for {}: {}", path.display(), error);
                ScanError::Io {
                    path,
                    source: std::io::Error::other(error.to_string()),
                }
            }
        }
    }
}
