//! Persistent storage for beacon observations.
//!
//! A single SQLite file holds the `beacons` table. The connection is opened
//! on first use, so a fresh install has no live file until the first sighting
//! is written.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{BeaconObservation, NewObservation};

/// Errors from the observation store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create the data directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Failed to copy the live file.
    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        /// Source file.
        from: PathBuf,
        /// Destination file.
        to: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Any other I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Name of the observation table.
pub const TABLE_NAME: &str = "beacons";

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS beacons (
        sl INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL,
        major TEXT NOT NULL,
        minor TEXT NOT NULL,
        rssi INTEGER NOT NULL,
        timestamp INTEGER NOT NULL
    );
";

/// Get the default data directory.
///
/// On Linux: `/var/lib/beaconlog/`
/// Elsewhere: the platform data directory for `beaconlog`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/beaconlog")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beaconlog")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    }
}

/// SQLite-backed store for beacon observations.
pub struct BeaconStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for BeaconStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl BeaconStore {
    /// Create a store for the database file at `path`. Nothing is touched on
    /// disk until the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Path of the live database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the live file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(path: &Path) -> StorageResult<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        // Rollback journal keeps every committed row inside the main file.
        conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA synchronous = FULL;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Run `f` on the connection, opening (and creating) the file if needed.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let mut guard = self.lock();
        // The file may have been removed behind an open handle.
        if guard.is_some() && !self.path.exists() {
            *guard = None;
        }
        match &mut *guard {
            Some(conn) => f(conn),
            slot => f(slot.insert(Self::open(&self.path)?)),
        }
    }

    /// Run `f` only if the live file exists.
    fn with_existing<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.with_conn(f).map(Some)
    }

    /// Insert one observation and return its sequence id.
    pub fn insert(&self, observation: &NewObservation) -> StorageResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO beacons (uid, major, minor, rssi, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    observation.uuid,
                    observation.major,
                    observation.minor,
                    observation.rssi,
                    observation.captured_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Delete every row, keeping the schema and the file.
    ///
    /// Returns the number of rows removed. The AUTOINCREMENT counter is kept,
    /// so sequence ids are never handed out twice.
    pub fn clear(&self) -> StorageResult<usize> {
        let removed = self
            .with_existing(|conn| Ok(conn.execute("DELETE FROM beacons", [])?))?
            .unwrap_or(0);
        debug!(removed, "Cleared live table");
        Ok(removed)
    }

    /// Number of stored observations (0 when there is no live file).
    pub fn row_count(&self) -> StorageResult<u64> {
        Ok(self
            .with_existing(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM beacons", [], |row| row.get(0))?)
            })?
            .unwrap_or(0))
    }

    /// Every stored observation in insertion order.
    pub fn observations(&self) -> StorageResult<Vec<BeaconObservation>> {
        Ok(self
            .with_existing(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT sl, uid, major, minor, rssi, timestamp FROM beacons ORDER BY sl",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(BeaconObservation {
                            sequence_id: row.get(0)?,
                            uuid: row.get(1)?,
                            major: row.get(2)?,
                            minor: row.get(3)?,
                            rssi: row.get(4)?,
                            captured_at: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })?
            .unwrap_or_default())
    }

    /// Copy the live file byte-for-byte to `dest`.
    ///
    /// Holds the connection lock for the duration so no write can interleave.
    /// Refuses to overwrite an existing `dest`. Returns the number of bytes
    /// copied.
    pub fn snapshot_to(&self, dest: &Path) -> StorageResult<u64> {
        let _guard = self.lock();
        let copy_err = |source| StorageError::Copy {
            from: self.path.clone(),
            to: dest.to_path_buf(),
            source,
        };

        let mut src = File::open(&self.path).map_err(copy_err)?;
        let mut dst = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(copy_err)?;
        let bytes = io::copy(&mut src, &mut dst).map_err(copy_err)?;
        dst.sync_all().map_err(copy_err)?;
        Ok(bytes)
    }
}
