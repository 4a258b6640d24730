//! Application configuration management.
//!
//! Settings are layered with figment, later layers overriding earlier ones:
//!
//! 1. [`Config::default`]
//! 2. a TOML file (`--config FILE`, or `config.toml` in the platform config
//!    directory if it exists)
//! 3. environment variables prefixed with `SHARELIST_` (`__` separates
//!    nested keys)
//! 4. command-line flags, applied by the caller after loading
//!
//! # Example
//!
//! ```toml
//! share_roots = ["/home/me/Music", "/home/me/Books"]
//! scan_interval_secs = 30
//! sweep_interval_secs = 600
//! max_concurrent_hashes = 2
//! ignore_patterns = ["*.tmp", "node_modules/"]
//! ```

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::HashCacheConfig;
use crate::scanner::hasher::DEFAULT_MMAP_THRESHOLD;
use crate::scanner::WalkerConfig;
use crate::updater::LocalUpdaterConfig;

/// Prefix of environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "SHARELIST_";

/// Longest accepted scan, sweep or remote interval (30 days).
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Errors from loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The merged values are inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be written.
    #[error("Failed to save configuration to {path}: {reason}")]
    Save {
        /// Target file
        path: PathBuf,
        /// Underlying error
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local directories offered to peers.
    pub share_roots: Vec<PathBuf>,
    /// Seconds between two scans of every share root.
    pub scan_interval_secs: u64,
    /// Seconds between two sweeps; never shorter than the scan interval.
    pub sweep_interval_secs: u64,
    /// Seconds between two fetches of each peer listing.
    pub remote_interval_secs: u64,
    /// Number of files hashed concurrently.
    pub max_concurrent_hashes: usize,
    /// Upper bound on cached hash records (unbounded when absent).
    pub cache_max_records: Option<usize>,
    /// Files at least this large are memory-mapped for hashing.
    pub mmap_threshold: u64,
    /// Skip entries whose name starts with a dot.
    pub skip_hidden: bool,
    /// Follow symbolic links while scanning.
    pub follow_symlinks: bool,
    /// Gitignore-style patterns excluded from every share.
    pub ignore_patterns: Vec<String>,
    /// Directory for snapshots and the hash cache database.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            share_roots: Vec::new(),
            scan_interval_secs: 60,
            sweep_interval_secs: 300,
            remote_interval_secs: 120,
            max_concurrent_hashes: 4,
            cache_max_records: None,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
            skip_hidden: false,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from all layers and validate it.
    ///
    /// `path` selects the TOML file; without it the platform default is used
    /// when present. An explicitly given file must exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Load`] if a layer cannot be parsed,
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => {
                if !p.is_file() {
                    return Err(ConfigError::Invalid(format!(
                        "configuration file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => Self::config_path().filter(|p| p.is_file()),
        };
        if let Some(file) = &file {
            log::debug!("Loading configuration from {}", file.display());
        }

        let config: Self = Self::figment(file.as_deref())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults merged with the TOML file at `path`, without the environment.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(p) => figment.merge(Toml::file(p)),
            None => figment,
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for zero intervals, intervals above
    /// [`MAX_INTERVAL_SECS`], zero hash workers or a sweep interval shorter
    /// than the scan interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("scan_interval_secs", self.scan_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("remote_interval_secs", self.remote_interval_secs),
        ] {
            if value > MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{key} ({value}) must not exceed {MAX_INTERVAL_SECS}"
                )));
            }
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scan_interval_secs must be positive".to_string(),
            ));
        }
        if self.remote_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "remote_interval_secs must be positive".to_string(),
            ));
        }
        if self.sweep_interval_secs < self.scan_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "sweep_interval_secs ({}) must not be shorter than scan_interval_secs ({})",
                self.sweep_interval_secs, self.scan_interval_secs
            )));
        }
        if self.max_concurrent_hashes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_hashes must be at least 1".to_string(),
            ));
        }
        if self.cache_max_records == Some(0) {
            return Err(ConfigError::Invalid(
                "cache_max_records must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the configuration as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Save`] if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let save_err = |reason: String| ConfigError::Save {
            path: path.to_path_buf(),
            reason,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_err(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| save_err(e.to_string()))
    }

    /// Default platform-specific configuration file.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "sharelist", "sharelist")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Data directory: the configured one, else the platform default.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(|| {
            ProjectDirs::from("org", "sharelist", "sharelist")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
    }

    /// Settings for the shared hash cache.
    #[must_use]
    pub fn hash_cache_config(&self) -> HashCacheConfig {
        HashCacheConfig {
            max_concurrent_hashes: self.max_concurrent_hashes,
            max_records: self.cache_max_records,
            mmap_threshold: self.mmap_threshold,
        }
    }

    /// Settings for each local updater.
    #[must_use]
    pub fn local_updater_config(&self) -> LocalUpdaterConfig {
        LocalUpdaterConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            walker: WalkerConfig::new(
                self.follow_symlinks,
                self.skip_hidden,
                self.ignore_patterns.clone(),
            ),
        }
    }

    /// Delay between two fetches of a peer listing.
    #[must_use]
    pub fn remote_interval(&self) -> Duration {
        Duration::from_secs(self.remote_interval_secs)
    }
}
