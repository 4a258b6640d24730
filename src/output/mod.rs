//! Rendering of listings for the command line.
//!
//! - [`text`]: one line per file, sizes in human units
//! - [`json`]: machine-readable listing with a summary block
//!
//! ```no_run
//! use sharelist::output::{json::JsonOutput, ListingSummary};
//! use sharelist::error::ExitCode;
//!
//! let summary = ListingSummary::default();
//! let output = JsonOutput::new(&[], &summary, ExitCode::Success);
//! println!("{}", output.to_json_pretty().unwrap());
//! ```

pub mod json;
pub mod text;

use std::time::Duration;

pub use json::JsonOutput;
pub use text::TextOutput;

use crate::cache::CacheStats;
use crate::listing::ListingRecord;
use crate::updater::TickReport;

/// Totals printed after a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSummary {
    /// Files in the listing
    pub files: usize,
    /// Sum of their sizes
    pub total_size: u64,
    /// Directories observed while indexing
    pub directories: usize,
    /// Paths that could not be read
    pub unreadable: usize,
    /// Remote records rejected as malformed
    pub malformed: usize,
    /// Entries removed by sweeps
    pub removed: usize,
    /// Hashes answered from the cache
    pub cache_hits: u64,
    /// Hashes computed
    pub cache_misses: u64,
    /// Wall time of the run
    pub duration: Duration,
    /// The run stopped early
    pub interrupted: bool,
}

impl ListingSummary {
    /// Summarize `records` and the counters gathered while producing them.
    #[must_use]
    pub fn new(records: &[ListingRecord], report: &TickReport, duration: Duration) -> Self {
        Self {
            files: records.len(),
            total_size: records.iter().map(|r| r.size).sum(),
            directories: report.directories,
            unreadable: report.unreadable,
            malformed: report.malformed,
            removed: report.removed(),
            duration,
            ..Self::default()
        }
    }

    /// Attach hash cache counters.
    #[must_use]
    pub fn with_cache_stats(mut self, stats: &CacheStats) -> Self {
        self.cache_hits = stats.hits;
        self.cache_misses = stats.misses;
        self
    }

    /// Mark the run as interrupted.
    #[must_use]
    pub fn interrupted(mut self, interrupted: bool) -> Self {
        self.interrupted = interrupted;
        self
    }
}

/// Errors that can occur while writing output.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error while writing output: {0}")]
    Io(#[from] std::io::Error),
}
