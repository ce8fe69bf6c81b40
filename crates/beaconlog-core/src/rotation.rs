//! Snapshot-and-clear of the live database.
//!
//! Rotation copies the whole live file to `<database_name><epoch-millis>`
//! next to it and only then empties the live table. If clearing fails after a
//! good copy, the backup is still complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::storage::{BeaconStore, StorageResult};
use crate::ui::{UiHandle, NOTICE_DATABASE_SAVED, NOTICE_NO_DATABASE, NOTICE_SAVE_FAILED};

/// What a rotation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RotationOutcome {
    /// The live file was backed up and cleared.
    Saved {
        /// File name of the new backup.
        backup: String,
        /// Bytes copied.
        bytes: u64,
        /// Rows removed from the live table.
        cleared_rows: usize,
    },

    /// There was no live file.
    NothingToSave,

    /// Copy or clear failed.
    Failed {
        /// What went wrong.
        message: String,
        /// Backup written before the failure, if any.
        backup: Option<String>,
    },
}

/// A backup file available for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "beaconlog1700000000000",
    "size_bytes": 12288,
    "created_at_millis": 1700000000000_i64,
    "created_at_utc": "2023-11-14T22:13:20Z"
}))]
pub struct BackupInfo {
    /// File name.
    pub name: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Timestamp embedded in the name.
    pub created_at_millis: i64,
    /// The same timestamp as RFC 3339.
    pub created_at_utc: String,
}

/// Backs up and clears the live store.
pub struct StorageRotation {
    store: Arc<BeaconStore>,
    clock: Arc<dyn Clock>,
    ui: UiHandle,
}

impl StorageRotation {
    /// Create a rotation over `store`.
    pub fn new(store: Arc<BeaconStore>, clock: Arc<dyn Clock>, ui: UiHandle) -> Self {
        Self { store, clock, ui }
    }

    fn base_name(&self) -> String {
        self.store
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn backup_dir(&self) -> &Path {
        self.store.path().parent().unwrap_or_else(|| Path::new("."))
    }

    /// Millis embedded in `name`, if it is one of our backups.
    #[must_use]
    pub fn parse_backup_name(&self, name: &str) -> Option<i64> {
        let suffix = name.strip_prefix(&self.base_name())?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    /// Resolve a backup by file name, rejecting anything else.
    #[must_use]
    pub fn backup_path(&self, name: &str) -> Option<PathBuf> {
        self.parse_backup_name(name)?;
        let path = self.backup_dir().join(name);
        path.is_file().then_some(path)
    }

    /// Every backup next to the live file, oldest first.
    pub fn list_backups(&self) -> StorageResult<Vec<BackupInfo>> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(millis) = self.parse_backup_name(&name) else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            backups.push(BackupInfo {
                name,
                size_bytes: meta.len(),
                created_at_millis: millis,
                created_at_utc: DateTime::<Utc>::from_timestamp_millis(millis)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            });
        }
        backups.sort_by_key(|b| b.created_at_millis);
        Ok(backups)
    }

    /// Back up and clear the live store off the async runtime.
    ///
    /// Never fails: every outcome is logged and reported as a user notice.
    pub async fn commit_and_rotate(&self) -> RotationOutcome {
        let store = Arc::clone(&self.store);
        let backup_name = format!("{}{}", self.base_name(), self.clock.now_millis());
        let backup_path = self.backup_dir().join(&backup_name);
        info!(backup = %backup_name, "Committing database");

        let outcome = tokio::task::spawn_blocking(move || rotate(&store, &backup_path, backup_name))
            .await
            .unwrap_or_else(|e| RotationOutcome::Failed {
                message: format!("rotation task failed: {e}"),
                backup: None,
            });

        match &outcome {
            RotationOutcome::Saved { .. } => self.ui.notice(NOTICE_DATABASE_SAVED),
            RotationOutcome::NothingToSave => self.ui.notice(NOTICE_NO_DATABASE),
            RotationOutcome::Failed { .. } => self.ui.notice(NOTICE_SAVE_FAILED),
        }
        outcome
    }
}

fn rotate(store: &BeaconStore, backup_path: &Path, backup_name: String) -> RotationOutcome {
    if !store.exists() {
        info!("No database file found");
        return RotationOutcome::NothingToSave;
    }

    let bytes = match store.snapshot_to(backup_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Unable to back up database");
            return RotationOutcome::Failed {
                message: e.to_string(),
                backup: None,
            };
        }
    };

    match store.clear() {
        Ok(cleared_rows) => {
            info!(backup = %backup_name, bytes, cleared_rows, "Database saved successfully");
            RotationOutcome::Saved {
                backup: backup_name,
                bytes,
                cleared_rows,
            }
        }
        Err(e) => {
            warn!(error = %e, backup = %backup_name, "Backup written but live table not cleared");
            RotationOutcome::Failed {
                message: e.to_string(),
                backup: Some(backup_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::NewObservation;
    use crate::ui::UiEvent;
    use tempfile::tempdir;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(dir: &Path) -> (StorageRotation, Arc<BeaconStore>, UnboundedReceiver<UiEvent>) {
        let store = Arc::new(BeaconStore::new(dir.join("beaconlog")));
        let (ui, rx) = UiHandle::channel();
        let rotation = StorageRotation::new(
            Arc::clone(&store),
            Arc::new(FixedClock::new(1_700_000_000_000)),
            ui,
        );
        (rotation, store, rx)
    }

    fn notice(rx: &mut UnboundedReceiver<UiEvent>) -> String {
        match rx.try_recv().unwrap() {
            UiEvent::Notice { text } => text,
            other => panic!("expected notice, got {other:?}"),
        }
    }

    fn row(i: i64) -> NewObservation {
        NewObservation {
            uuid: format!("uuid-{i}"),
            major: "1".into(),
            minor: "2".into(),
            rssi: -60,
            captured_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_nothing_to_save_without_live_file() {
        let dir = tempdir().unwrap();
        let (rotation, store, mut rx) = setup(dir.path());

        let outcome = rotation.commit_and_rotate().await;
        assert_eq!(outcome, RotationOutcome::NothingToSave);
        assert_eq!(notice(&mut rx), NOTICE_NO_DATABASE);
        assert!(!store.exists());
        assert!(rotation.list_backups().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_backup_matches_live_file_and_table_is_cleared() {
        let dir = tempdir().unwrap();
        let (rotation, store, mut rx) = setup(dir.path());
        for i in 0..3 {
            store.insert(&row(i)).unwrap();
        }
        let before = std::fs::read(store.path()).unwrap();

        let outcome = rotation.commit_and_rotate().await;
        let RotationOutcome::Saved {
            backup,
            bytes,
            cleared_rows,
        } = outcome
        else {
            panic!("expected Saved, got {outcome:?}");
        };
        assert_eq!(backup, "beaconlog1700000000000");
        assert_eq!(bytes as usize, before.len());
        assert_eq!(cleared_rows, 3);
        assert_eq!(notice(&mut rx), NOTICE_DATABASE_SAVED);

        let copy = std::fs::read(dir.path().join(&backup)).unwrap();
        assert_eq!(copy, before);
        assert_eq!(store.row_count().unwrap(), 0);
        assert!(store.exists());
    }

    #[tokio::test]
    async fn test_backup_name_collision_fails_without_clearing() {
        let dir = tempdir().unwrap();
        let (rotation, store, mut rx) = setup(dir.path());
        store.insert(&row(0)).unwrap();
        std::fs::write(dir.path().join("beaconlog1700000000000"), b"older").unwrap();

        let outcome = rotation.commit_and_rotate().await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed { backup: None, .. }
        ));
        assert_eq!(notice(&mut rx), NOTICE_SAVE_FAILED);
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_valid_backup() {
        let dir = tempdir().unwrap();
        let (rotation, store, mut rx) = setup(dir.path());
        for i in 0..2 {
            store.insert(&row(i)).unwrap();
        }
        // Copying still works; deleting rows does not.
        rusqlite::Connection::open(store.path())
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER keep_rows BEFORE DELETE ON beacons
                 BEGIN SELECT RAISE(ABORT, 'rows are pinned'); END;",
            )
            .unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let outcome = rotation.commit_and_rotate().await;
        let RotationOutcome::Failed {
            message,
            backup: Some(backup),
        } = outcome
        else {
            panic!("expected Failed with a backup, got {outcome:?}");
        };
        assert!(message.contains("rows are pinned"), "{message}");
        assert_eq!(backup, "beaconlog1700000000000");
        assert_eq!(notice(&mut rx), NOTICE_SAVE_FAILED);

        let copy_path = dir.path().join(&backup);
        assert_eq!(std::fs::read(&copy_path).unwrap(), before);
        let copied_rows: i64 = rusqlite::Connection::open(&copy_path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM beacons", [], |r| r.get(0))
            .unwrap();
        assert_eq!(copied_rows, 2);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_backups_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        let (rotation, store, _rx) = setup(dir.path());
        store.insert(&row(0)).unwrap();
        rotation.commit_and_rotate().await;

        std::fs::write(dir.path().join("beaconlog-journal"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let backups = rotation.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "beaconlog1700000000000");
        assert_eq!(backups[0].created_at_millis, 1_700_000_000_000);
        assert!(backups[0].created_at_utc.starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_backup_path_rejects_traversal_and_live_file() {
        let dir = tempdir().unwrap();
        let (rotation, _store, _rx) = setup(dir.path());
        std::fs::write(dir.path().join("beaconlog42"), b"x").unwrap();

        assert!(rotation.backup_path("beaconlog42").is_some());
        assert!(rotation.backup_path("beaconlog").is_none());
        assert!(rotation.backup_path("beaconlog43").is_none());
        assert!(rotation.backup_path("../beaconlog42").is_none());
        assert!(rotation.backup_path("beaconlog4/2").is_none());
    }
}
