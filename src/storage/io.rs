//! Persistence of storage snapshots.
//!
//! Snapshots are written as pretty JSON wrapped in an envelope carrying the
//! SHA-256 checksum of the compact serialization. Loading verifies the
//! checksum before the tree invariants are checked by
//! [`super::DirectoryStorage::restore`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use super::snapshot::StorageSnapshot;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    /// SHA256 checksum of the compact snapshot JSON.
    checksum: String,
    snapshot: StorageSnapshot,
}

fn checksum(snapshot: &StorageSnapshot) -> Result<String> {
    let json = serde_json::to_string(snapshot)
        .context("Failed to serialize snapshot for checksum calculation")?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl StorageSnapshot {
    /// Serialize to JSON inside a checksummed envelope.
    pub fn to_json(&self) -> Result<String> {
        let envelope = SnapshotEnvelope {
            checksum: checksum(self)?,
            snapshot: self.clone(),
        };
        serde_json::to_string_pretty(&envelope).context("Failed to serialize snapshot envelope")
    }

    /// Parse an envelope and verify its checksum.
    pub fn from_json(content: &str) -> Result<Self> {
        let envelope: SnapshotEnvelope = serde_json::from_str(content)
            .context("Failed to parse snapshot envelope. The file might be corrupted.")?;

        if checksum(&envelope.snapshot)? != envelope.checksum {
            anyhow::bail!(
                "Snapshot integrity check failed: checksum mismatch. The file may have been tampered with or corrupted."
            );
        }
        Ok(envelope.snapshot)
    }

    /// Write the snapshot to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create snapshot file: {}", tmp.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write snapshot to: {}", tmp.display()))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move snapshot into place: {}", path.display()))?;
        Ok(())
    }

    /// Read and verify a snapshot from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirectoryStorage, EntryType};
    use tempfile::tempdir;

    fn sample() -> StorageSnapshot {
        let storage = DirectoryStorage::new("share");
        storage
            .create_entry(storage.root(), "a.txt", EntryType::File)
            .unwrap();
        storage.serialize()
    }

    #[test]
    fn test_snapshot_to_json() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"checksum\":"));
        assert!(json.contains("\"snapshot\":"));
        assert!(json.contains("a.txt"));
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("share.json");
        let snapshot = sample();

        snapshot.save(&path).unwrap();
        let loaded = StorageSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_snapshot_tampering_detected() {
        let json = sample().to_json().unwrap();
        let tampered = json.replace("a.txt", "b.txt");
        let err = StorageSnapshot::from_json(&tampered).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_snapshot_load_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(StorageSnapshot::load(&path).is_err());
    }
}
