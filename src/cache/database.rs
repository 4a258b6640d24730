//! SQLite-backed persistence of hash cache snapshots.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::entry::{time_from_parts, time_to_parts, CacheEntry, HashCacheSnapshot};
use super::{CacheError, CacheResult};
use crate::scanner::HASH_LEN;

const SCHEMA_VERSION: i64 = 1;

/// Persistent store for [`HashCacheSnapshot`]s.
///
/// Each [`CacheDatabase::save`] replaces the stored content in one
/// transaction, so a crash leaves either the previous or the new snapshot.
pub struct CacheDatabase {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for CacheDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CacheDatabase {
    /// Opens or creates a cache database at the specified path.
    ///
    /// # Errors
    ///
    /// Fails if the file is not an SQLite database or the schema cannot be
    /// created.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                 key   TEXT PRIMARY KEY,
                 value INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS hashes (
                 path        TEXT PRIMARY KEY,
                 size        INTEGER NOT NULL,
                 mtime_secs  INTEGER NOT NULL,
                 mtime_nanos INTEGER NOT NULL,
                 hash        BLOB NOT NULL,
                 rank        INTEGER NOT NULL
             );",
        )?;

        let version: Option<i64> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(CacheError::Corrupt(format!(
                    "unsupported schema version {v}"
                )))
            }
        }

        log::debug!("Opened hash cache database at {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Replace the stored content with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the write fails (e.g. read-only file).
    pub fn save(&mut self, snapshot: &HashCacheSnapshot) -> CacheResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM hashes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO hashes (path, size, mtime_secs, mtime_nanos, hash, rank)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (rank, entry) in snapshot.entries.iter().enumerate() {
                let (secs, nanos) = time_to_parts(entry.mtime);
                stmt.execute(params![
                    entry.path.to_string_lossy().into_owned(),
                    i64::try_from(entry.size).unwrap_or(i64::MAX),
                    secs,
                    nanos,
                    &entry.hash[..],
                    i64::try_from(rank).unwrap_or(i64::MAX),
                ])?;
            }
        }
        tx.commit()?;
        log::debug!(
            "Saved {} hash cache entries to {}",
            snapshot.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Load the stored snapshot, most recently used entry first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupt`] if a stored hash has the wrong length.
    pub fn load(&self) -> CacheResult<HashCacheSnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT path, size, mtime_secs, mtime_nanos, hash FROM hashes ORDER BY rank",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (path, size, secs, nanos, blob) = row?;
            let hash: [u8; HASH_LEN] = blob.as_slice().try_into().map_err(|_| {
                CacheError::Corrupt(format!("hash of {path} has length {}", blob.len()))
            })?;
            entries.push(CacheEntry {
                path: PathBuf::from(path),
                size: u64::try_from(size).unwrap_or(0),
                mtime: time_from_parts(secs, nanos),
                hash,
            });
        }
        Ok(HashCacheSnapshot::new(entries))
    }

    /// Remove all stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    pub fn clear(&self) -> CacheResult<()> {
        self.conn.execute("DELETE FROM hashes", [])?;
        Ok(())
    }

    /// Close the connection, reporting any error.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if SQLite fails to close cleanly.
    pub fn close(self) -> CacheResult<()> {
        self.conn.close().map_err(|(_, e)| CacheError::Database(e))
    }
}
