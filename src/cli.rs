//! Command-line interface definitions for sharelist.
//!
//! Global options control logging, the configuration file and error
//! reporting; each subcommand drives the indexer in one mode.
//!
//! # Example
//!
//! ```bash
//! # Index two directories once and print the listing
//! sharelist scan ~/Music ~/Books
//!
//! # Same, as JSON
//! sharelist scan ~/Music --output json
//!
//! # Keep the configured shares indexed until Ctrl+C
//! sharelist -v watch
//!
//! # Mirror a peer listing published as <dir>/alice.json
//! sharelist ingest --peer alice --listing-dir ./listings
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

/// Indexer for shared directories.
///
/// sharelist keeps a content-hashed index (BLAKE3) of local share roots and
/// mirrors of the listings advertised by peers.
#[derive(Debug, Parser)]
#[command(name = "sharelist")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (default: config.toml in the platform config dir)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index directories once and print the listing
    Scan(ScanArgs),
    /// Keep shares indexed until interrupted
    Watch(WatchArgs),
    /// Mirror a peer listing from a directory of listing files
    Ingest(IngestArgs),
}

/// Options overriding the traversal and hashing settings of the
/// configuration.
#[derive(Debug, Default, Args)]
pub struct IndexOverrides {
    /// Glob patterns to ignore (can be specified multiple times)
    ///
    /// Added to the patterns from the configuration and any .gitignore files.
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Follow symbolic links while scanning
    ///
    /// Warning: May cause infinite loops if symlinks form cycles.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Number of files hashed concurrently
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub hash_threads: Option<u64>,

    /// Memory-map files at least this large for hashing (e.g. 64MiB)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub mmap_threshold: Option<u64>,
}

impl IndexOverrides {
    /// Apply the given flags on top of a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        config
            .ignore_patterns
            .extend(self.ignore_patterns.iter().cloned());
        config.skip_hidden |= self.skip_hidden;
        config.follow_symlinks |= self.follow_symlinks;
        if let Some(n) = self.hash_threads {
            config.max_concurrent_hashes = usize::try_from(n).unwrap_or(usize::MAX);
        }
        if let Some(threshold) = self.mmap_threshold {
            config.mmap_threshold = threshold;
        }
    }
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to index
    #[arg(value_name = "ROOT", required = true)]
    pub roots: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Seconds to wait for outstanding hashes before printing
    #[arg(long, value_name = "SECS", default_value = "600")]
    pub hash_timeout: u64,

    #[command(flatten)]
    pub overrides: IndexOverrides,
}

/// Arguments for the watch subcommand.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Directories to share (default: share_roots from the configuration)
    #[arg(value_name = "ROOT")]
    pub roots: Vec<PathBuf>,

    /// Directory holding snapshots and the hash cache
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Peers to mirror from --listing-dir (can be specified multiple times)
    #[arg(long = "peer", value_name = "ID", requires = "listing_dir")]
    pub peers: Vec<String>,

    /// Directory of <peer>.json listing files
    #[arg(long, value_name = "DIR")]
    pub listing_dir: Option<PathBuf>,

    /// Publish the local listing as <DIR>/<ID>.json after every round
    #[arg(long, value_name = "ID", requires = "listing_dir")]
    pub publish_as: Option<String>,

    /// Do not restore or save snapshots
    #[arg(long)]
    pub no_persist: bool,

    #[command(flatten)]
    pub overrides: IndexOverrides,
}

/// Arguments for the ingest subcommand.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Peer whose listing is ingested
    #[arg(long, value_name = "ID")]
    pub peer: String,

    /// Directory of <peer>.json listing files
    #[arg(long, value_name = "DIR")]
    pub listing_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per file
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use sharelist::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    // Find where the number ends and the suffix begins
    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    if num < 0.0 {
        return Err("Size cannot be negative".to_string());
    }

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
