//! Backup listing and download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use beaconlog_core::{BackupInfo, BeaconLogError};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the backups router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_backups))
        .route("/{name}", get(download_backup))
}

/// All backups next to the live database.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "backups": [{
        "name": "beaconlog1700000000000",
        "size_bytes": 12288,
        "created_at_millis": 1700000000000_i64,
        "created_at_utc": "2023-11-14T22:13:20+00:00"
    }],
    "count": 1
}))]
pub struct BackupListResponse {
    /// Backups, oldest first.
    pub backups: Vec<BackupInfo>,
    /// Number of backups.
    pub count: usize,
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::InternalError {
        error_code: "task_failed".to_string(),
        message: "Backup task failed".to_string(),
        details: Some(e.to_string()),
    }
}

/// List backups.
#[utoipa::path(
    get,
    path = "/api/backups",
    tag = "backups",
    operation_id = "listBackups",
    summary = "List database backups",
    description = "Every backup written by stopping a session, oldest first.",
    responses(
        (status = 200, description = "Backups listed", body = BackupListResponse),
        (status = 500, description = "Backup directory unreadable", body = super::error::ErrorResponse)
    )
)]
pub async fn list_backups(State(state): State<SharedState>) -> ApiResult<Json<BackupListResponse>> {
    let rotation = state.rotation.clone();
    let backups = tokio::task::spawn_blocking(move || rotation.list_backups())
        .await
        .map_err(join_error)??;
    Ok(Json(BackupListResponse {
        count: backups.len(),
        backups,
    }))
}

/// Download one backup.
#[utoipa::path(
    get,
    path = "/api/backups/{name}",
    tag = "backups",
    operation_id = "downloadBackup",
    summary = "Download a backup",
    description = "Returns the backup file byte-for-byte. Only names produced by \
        the rotation are accepted.",
    params(
        ("name" = String, Path, description = "Backup file name", example = "beaconlog1700000000000")
    ),
    responses(
        (status = 200, description = "Backup contents", content_type = "application/octet-stream", body = Vec<u8>),
        (status = 404, description = "No such backup", body = super::error::ErrorResponse)
    )
)]
pub async fn download_backup(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let path = state
        .rotation
        .backup_path(&name)
        .ok_or_else(|| ApiError::from(BeaconLogError::BackupNotFound(name.clone())))?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| ApiError::InternalError {
        error_code: "io_error".to_string(),
        message: format!("Unable to read backup {name}"),
        details: Some(e.to_string()),
    })?;
    debug!(backup = %name, bytes = bytes.len(), "Serving backup");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}
