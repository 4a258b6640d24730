//! JSON output formatter for listings.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "files": [
//!     {
//!       "path": "Music/a.mp3",
//!       "size": 1024,
//!       "modified": "2024-01-01T00:00:00+00:00",
//!       "hash": "af1349b9..."
//!     }
//!   ],
//!   "summary": {
//!     "total_files": 1,
//!     "total_size": 1024,
//!     "directories": 1,
//!     "unreadable": 0,
//!     "malformed": 0,
//!     "removed": 0,
//!     "cache_hits": 0,
//!     "cache_misses": 1,
//!     "duration_ms": 12,
//!     "interrupted": false,
//!     "exit_code": 0,
//!     "exit_code_name": "SL000"
//!   }
//! }
//! ```

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ListingSummary, OutputError};
use crate::error::ExitCode;
use crate::listing::ListingRecord;
use crate::scanner::hash_to_hex;

/// A single file in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonFile {
    /// Path prefixed with the share name or peer listing path
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (RFC 3339)
    pub modified: String,
    /// BLAKE3 hash as hexadecimal string (64 characters)
    pub hash: String,
}

impl From<&ListingRecord> for JsonFile {
    fn from(record: &ListingRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified: DateTime::<Utc>::from(record.modified).to_rfc3339(),
            hash: hash_to_hex(&record.hash),
        }
    }
}

/// Summary statistics in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    /// Files in the listing
    pub total_files: usize,
    /// Total size of the listed files in bytes
    pub total_size: u64,
    /// Directories observed
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
    /// Duration of the run in milliseconds
    pub duration_ms: u64,
    /// Whether the run was interrupted
    pub interrupted: bool,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "SL000")
    pub exit_code_name: String,
}

impl JsonSummary {
    /// Create a JSON summary from a [`ListingSummary`] and an exit code.
    #[must_use]
    pub fn from_summary(summary: &ListingSummary, exit_code: ExitCode) -> Self {
        Self {
            total_files: summary.files,
            total_size: summary.total_size,
            directories: summary.directories,
            unreadable: summary.unreadable,
            malformed: summary.malformed,
            removed: summary.removed,
            cache_hits: summary.cache_hits,
            cache_misses: summary.cache_misses,
            duration_ms: u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            interrupted: summary.interrupted,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }
}

/// Complete JSON output structure.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// Listed files, sorted by path
    pub files: Vec<JsonFile>,
    /// Run statistics
    pub summary: JsonSummary,
}

impl JsonOutput {
    /// Create a JSON output from listing records, a summary and the exit code.
    #[must_use]
    pub fn new(records: &[ListingRecord], summary: &ListingSummary, exit_code: ExitCode) -> Self {
        let mut files: Vec<JsonFile> = records.iter().map(JsonFile::from).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            files,
            summary: JsonSummary::from_summary(summary, exit_code),
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer, followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), OutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}
