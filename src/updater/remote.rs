//! Remote Directory Updater: mirrors the listing advertised by one peer.
//!
//! Remote hashes are stored as supplied and never recomputed. Each successful
//! fetch replaces the mirror: records are validated one by one, present
//! entries are confirmed and the storage is swept so anything absent from the
//! listing disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::{resolve_child, DirectoryUpdater, TickReport};
use crate::listing::{ListingRecord, ListingSource, PeerId, RawListingRecord};
use crate::storage::{DirectoryStorage, EntryIndex, EntryType, StorageResult, UpdateStatus};

/// Keeps the mirror of one peer's share up to date.
pub struct RemoteDirectoryUpdater {
    peer: PeerId,
    storage: Arc<DirectoryStorage>,
    source: Arc<dyn ListingSource>,
    interval: Duration,
}

impl std::fmt::Debug for RemoteDirectoryUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDirectoryUpdater")
            .field("peer", &self.peer)
            .field("entries", &self.storage.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RemoteDirectoryUpdater {
    /// Create an updater with an empty mirror.
    #[must_use]
    pub fn new(peer: PeerId, source: Arc<dyn ListingSource>, interval: Duration) -> Self {
        let storage = Arc::new(DirectoryStorage::new(peer.0.clone()));
        Self::with_storage(peer, storage, source, interval)
    }

    /// Create an updater maintaining an existing (e.g. restored) mirror.
    #[must_use]
    pub fn with_storage(
        peer: PeerId,
        storage: Arc<DirectoryStorage>,
        source: Arc<dyn ListingSource>,
        interval: Duration,
    ) -> Self {
        Self {
            peer,
            storage,
            source,
            interval,
        }
    }

    /// The mirrored peer.
    #[must_use]
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Where listings are fetched from.
    #[must_use]
    pub fn source(&self) -> Arc<dyn ListingSource> {
        Arc::clone(&self.source)
    }

    /// Merge a full listing into the mirror and sweep what it no longer
    /// contains. Malformed records are skipped and counted.
    pub fn ingest(&self, records: &[RawListingRecord]) -> TickReport {
        let mut report = TickReport::default();
        let root = self.storage.root();
        let _ = self.storage.set_update_status(root, UpdateStatus::Confirmed);

        // Newest file mtime below each ingested directory.
        let mut newest: HashMap<EntryIndex, SystemTime> = HashMap::new();
        for raw in records {
            let record = match raw.validate() {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("[{}] skipping malformed record: {}", self.peer, e);
                    report.malformed += 1;
                    continue;
                }
            };
            match self.ingest_record(&record, &mut newest) {
                Ok(()) => report.files += 1,
                Err(e) => {
                    log::debug!("[{}] cannot ingest '{}': {}", self.peer, record.path, e);
                    report.malformed += 1;
                }
            }
        }

        report.directories = newest.len();
        for (dir, modified) in newest {
            // A directory replaced later in the batch may be gone already.
            let _ = self.storage.set_directory_modified(dir, modified);
        }
        report.swept = Some(self.storage.sweep());

        if report.malformed > 0 {
            log::warn!(
                "[{}] skipped {} malformed listing records",
                self.peer,
                report.malformed
            );
        }
        report
    }

    fn ingest_record(
        &self,
        record: &ListingRecord,
        newest: &mut HashMap<EntryIndex, SystemTime>,
    ) -> StorageResult<()> {
        let mut segments: Vec<&str> = record.path.split('/').collect();
        let file_name = segments.pop().unwrap_or_default();

        let mut chain = vec![self.storage.root()];
        let mut parent = self.storage.root();
        for name in segments {
            parent = resolve_child(&self.storage, parent, name, EntryType::Directory)?;
            self.storage
                .set_update_status(parent, UpdateStatus::Confirmed)?;
            chain.push(parent);
        }

        let index = resolve_child(&self.storage, parent, file_name, EntryType::File)?;
        let current = self.storage.entry(index);
        let up_to_date = current.as_ref().is_some_and(|e| {
            e.size() == Some(record.size)
                && e.last_modified == record.modified
                && e.hash() == Some(record.hash)
        });
        if !up_to_date {
            self.storage
                .update_file_metadata(index, record.size, record.modified, Some(record.hash))?;
            log::trace!("[{}] updated '{}'", self.peer, record.path);
        }
        self.storage
            .set_update_status(index, UpdateStatus::Confirmed)?;

        for dir in chain {
            let slot = newest.entry(dir).or_insert(record.modified);
            if record.modified > *slot {
                *slot = record.modified;
            }
        }
        Ok(())
    }
}

impl DirectoryUpdater for RemoteDirectoryUpdater {
    fn name(&self) -> &str {
        &self.peer.0
    }

    fn storage(&self) -> &Arc<DirectoryStorage> {
        &self.storage
    }

    fn tick(&self) -> TickReport {
        match self.source.fetch_remote_listing(&self.peer) {
            Ok(records) => {
                let report = self.ingest(&records);
                log::debug!(
                    "[{}] ingested {} files ({} malformed, {} removed)",
                    self.peer,
                    report.files,
                    report.malformed,
                    report.removed()
                );
                report
            }
            Err(e) => {
                log::warn!("{}; retrying next tick", e);
                TickReport {
                    fetch_failed: true,
                    ..TickReport::default()
                }
            }
        }
    }

    fn tick_interval(&self) -> Duration {
        self.interval
    }
}
