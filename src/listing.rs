//! Listing records exchanged with peers.
//!
//! A listing is a flat sequence of `(path, size, modified, hash)` records
//! describing every hashed file of a share. Outbound listings are produced by
//! [`crate::storage::DirectoryStorage::export_listing`]; inbound listings
//! arrive through a [`ListingSource`] as [`RawListingRecord`] values, which
//! are untrusted and validated one by one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::scanner::path_utils;
use crate::scanner::{hash_to_hex, hex_to_hash, Hash};

/// Identifier of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A validated listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    /// `/`-separated path relative to the share root.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time.
    pub modified: SystemTime,
    /// Content hash.
    pub hash: Hash,
}

/// Wire form of a listing record.
///
/// Every field is optional and the size is signed so a malformed record can
/// be decoded and rejected individually instead of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListingRecord {
    /// Relative path.
    #[serde(default)]
    pub path: Option<String>,
    /// Size in bytes; must be positive.
    #[serde(default)]
    pub size: Option<i64>,
    /// Modification time in seconds since the Unix epoch.
    #[serde(default)]
    pub modified: Option<i64>,
    /// Hex-encoded content hash.
    #[serde(default)]
    pub hash: Option<String>,
}

/// Why a raw record was rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    /// The size is zero or negative.
    #[error("non-positive size {0}")]
    NonPositiveSize(i64),
    /// The path is absolute or contains empty, `.` or `..` segments.
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    /// The hash is not 64 hex characters.
    #[error("invalid hash '{0}'")]
    InvalidHash(String),
}

impl RawListingRecord {
    /// Validate into a [`ListingRecord`].
    ///
    /// Path segments are normalized to NFC.
    ///
    /// # Errors
    ///
    /// Returns the first problem found as a [`MalformedRecord`].
    pub fn validate(&self) -> Result<ListingRecord, MalformedRecord> {
        let raw_path = self
            .path
            .as_deref()
            .ok_or(MalformedRecord::MissingField("path"))?;
        let size = self.size.ok_or(MalformedRecord::MissingField("size"))?;
        let modified = self
            .modified
            .ok_or(MalformedRecord::MissingField("modified"))?;
        let hash = self
            .hash
            .as_deref()
            .ok_or(MalformedRecord::MissingField("hash"))?;

        if size <= 0 {
            return Err(MalformedRecord::NonPositiveSize(size));
        }
        let segments = path_utils::split_relative(raw_path)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MalformedRecord::InvalidPath(raw_path.to_string()))?;
        let path = segments
            .iter()
            .map(|s| path_utils::normalize_name(s))
            .collect::<Vec<_>>()
            .join("/");
        let hash = hex_to_hash(hash).ok_or_else(|| MalformedRecord::InvalidHash(hash.to_string()))?;

        Ok(ListingRecord {
            path,
            size: size as u64,
            modified: from_unix_secs(modified),
            hash,
        })
    }
}

impl From<&ListingRecord> for RawListingRecord {
    fn from(record: &ListingRecord) -> Self {
        Self {
            path: Some(record.path.clone()),
            size: Some(i64::try_from(record.size).unwrap_or(i64::MAX)),
            modified: Some(to_unix_secs(record.modified)),
            hash: Some(hash_to_hex(&record.hash)),
        }
    }
}

/// Seconds since the Unix epoch (negative before it).
#[must_use]
pub fn to_unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

/// Inverse of [`to_unix_secs`].
#[must_use]
pub fn from_unix_secs(secs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Errors from fetching a remote listing.
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    /// The peer could not be reached.
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable {
        /// Peer that was asked
        peer: PeerId,
        /// Transport-level reason
        reason: String,
    },

    /// The listing as a whole could not be decoded.
    #[error("Malformed listing from {peer}: {reason}")]
    MalformedListing {
        /// Peer that sent the listing
        peer: PeerId,
        /// Decoder error
        reason: String,
    },
}

/// Network collaborator that fetches a peer's current listing.
pub trait ListingSource: Send + Sync {
    /// Fetch the full current listing of `peer`.
    ///
    /// # Errors
    ///
    /// [`RemoteError::PeerUnreachable`] or [`RemoteError::MalformedListing`].
    fn fetch_remote_listing(&self, peer: &PeerId) -> Result<Vec<RawListingRecord>, RemoteError>;
}

/// A [`ListingSource`] reading `<dir>/<peer>.json` files.
///
/// Each file holds a JSON array of [`RawListingRecord`]. A missing file
/// means the peer is unreachable.
#[derive(Debug, Clone)]
pub struct DirListingSource {
    dir: PathBuf,
}

impl DirListingSource {
    /// Create a source reading listings from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the listing file for `peer`.
    #[must_use]
    pub fn listing_path(&self, peer: &PeerId) -> PathBuf {
        self.dir.join(format!("{}.json", peer.0))
    }

    /// Write `records` as the listing of `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn publish(&self, peer: &PeerId, records: &[ListingRecord]) -> anyhow::Result<()> {
        let raw: Vec<RawListingRecord> = records.iter().map(RawListingRecord::from).collect();
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.listing_path(peer), serde_json::to_string_pretty(&raw)?)?;
        Ok(())
    }
}

impl ListingSource for DirListingSource {
    fn fetch_remote_listing(&self, peer: &PeerId) -> Result<Vec<RawListingRecord>, RemoteError> {
        let path = self.listing_path(peer);
        let content = std::fs::read_to_string(&path).map_err(|e| RemoteError::PeerUnreachable {
            peer: peer.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| RemoteError::MalformedListing {
            peer: peer.clone(),
            reason: e.to_string(),
        })
    }
}
