//! Scan session API endpoints.
//!
//! These stand in for the single start/stop control of the logger: `toggle`
//! is what the button does, `start` and `stop` are the explicit forms.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beaconlog_core::{ScanState, StartReport, StopReport, ToggleOutcome};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;
use crate::ui::Notice;

/// Creates the session router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_session))
        .route("/toggle", post(toggle_session))
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// The control screen.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "scanning",
    "control_label": "Stop",
    "notification": "Scanning for Beacons",
    "location_prompt_pending": false,
    "stored_rows": 42,
    "notices": [
        {"text": "NTP synced successfully", "posted_at_utc": "2025-01-15T03:30:00Z"}
    ]
}))]
pub struct SessionResponse {
    /// Session state.
    pub state: ScanState,

    /// Label the control shows.
    #[schema(example = "Stop")]
    pub control_label: String,

    /// Visible foreground notification title.
    #[schema(nullable)]
    pub notification: Option<String>,

    /// Whether the location-settings dialog is waiting for an answer.
    pub location_prompt_pending: bool,

    /// Rows in the live table.
    #[schema(example = 42)]
    pub stored_rows: u64,

    /// Recent notices, oldest first.
    pub notices: Vec<Notice>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current session and control screen.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get session state",
    description = "Returns the session state, the control label, the foreground \
        notification, whether a location prompt is pending, the live row count \
        and recent notices.",
    responses(
        (status = 200, description = "Session state retrieved", body = SessionResponse),
        (status = 500, description = "Database unreadable", body = super::error::ErrorResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> ApiResult<Json<SessionResponse>> {
    let store = state.store.clone();
    let stored_rows = tokio::task::spawn_blocking(move || store.row_count())
        .await
        .map_err(|e| ApiError::InternalError {
            error_code: "task_failed".to_string(),
            message: "Row count task failed".to_string(),
            details: Some(e.to_string()),
        })??;

    let session = state.controller.state();
    let view = state.view.read().await;
    Ok(Json(SessionResponse {
        state: session,
        control_label: view.control_state.control_label().to_string(),
        notification: view.notification.clone(),
        location_prompt_pending: view.location_prompt_pending,
        stored_rows,
        notices: view.notices.iter().cloned().collect(),
    }))
}

/// Press the start/stop control.
#[utoipa::path(
    post,
    path = "/api/session/toggle",
    tag = "session",
    operation_id = "toggleSession",
    summary = "Start or stop scanning",
    description = "Starts a session when idle and stops it when scanning. \
        Stopping backs up and clears the live database unless persistence is \
        disabled.",
    responses(
        (status = 200, description = "Transition done", body = ToggleOutcome),
        (status = 412, description = "Preflight failed and is required", body = super::error::ErrorResponse),
        (status = 503, description = "Ranging could not start", body = super::error::ErrorResponse)
    )
)]
pub async fn toggle_session(State(state): State<SharedState>) -> ApiResult<Json<ToggleOutcome>> {
    Ok(Json(state.controller.toggle().await?))
}

/// Start a session.
#[utoipa::path(
    post,
    path = "/api/session/start",
    tag = "session",
    operation_id = "startSession",
    summary = "Start scanning",
    description = "Runs the preflight, subscribes to range notifications and \
        shows the foreground notification.",
    responses(
        (status = 200, description = "Scanning", body = StartReport),
        (status = 409, description = "Already scanning", body = super::error::ErrorResponse),
        (status = 412, description = "Preflight failed and is required", body = super::error::ErrorResponse),
        (status = 503, description = "Ranging could not start", body = super::error::ErrorResponse)
    )
)]
pub async fn start_session(State(state): State<SharedState>) -> ApiResult<Json<StartReport>> {
    Ok(Json(state.controller.start().await?))
}

/// Stop the session.
#[utoipa::path(
    post,
    path = "/api/session/stop",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop scanning",
    description = "Unsubscribes, waits for queued rows to be written, then backs \
        up and clears the live database.",
    responses(
        (status = 200, description = "Idle", body = StopReport),
        (status = 409, description = "Not scanning", body = super::error::ErrorResponse)
    )
)]
pub async fn stop_session(State(state): State<SharedState>) -> ApiResult<Json<StopReport>> {
    Ok(Json(state.controller.stop().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use beaconlog_core::{Beacon, RotationOutcome};

    fn server(state: SharedState) -> TestServer {
        TestServer::new(crate::api::create_router(state)).unwrap()
    }

    async fn settle() {
        // Let the UI task apply queued events.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_toggle_starts_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = server(t.state);

        let outcome: ToggleOutcome = server.post("/api/session/toggle").await.json();
        assert!(matches!(outcome, ToggleOutcome::Started(_)));
        assert!(t.ranging.is_ranging());

        settle().await;
        let session: SessionResponse = server.get("/api/session").await.json();
        assert_eq!(session.state, ScanState::Scanning);
        assert_eq!(session.control_label, "Stop");
        assert_eq!(session.notification.as_deref(), Some("Scanning for Beacons"));

        let outcome: ToggleOutcome = server.post("/api/session/toggle").await.json();
        assert_eq!(
            outcome,
            ToggleOutcome::Stopped(StopReport {
                rotation: Some(RotationOutcome::NothingToSave)
            })
        );

        settle().await;
        let session: SessionResponse = server.get("/api/session").await.json();
        assert_eq!(session.state, ScanState::Idle);
        assert_eq!(session.control_label, "Start");
        assert_eq!(session.notification, None);
        assert_eq!(
            session.notices.last().map(|n| n.text.as_str()),
            Some(beaconlog_core::ui::NOTICE_NO_DATABASE)
        );
    }

    #[tokio::test]
    async fn test_rows_are_counted_while_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = server(t.state.clone());

        server.post("/api/session/start").await.assert_status_ok();
        t.ranging.deliver(vec![Beacon {
            id1: uuid::Uuid::nil(),
            id2: 1,
            id3: 2,
            rssi: -50,
            tx_power: -59,
        }]);
        let report: StopReport = server.post("/api/session/stop").await.json();
        assert!(matches!(
            report.rotation,
            Some(RotationOutcome::Saved { cleared_rows: 1, .. })
        ));

        let session: SessionResponse = server.get("/api/session").await.json();
        assert_eq!(session.stored_rows, 0);
    }

    #[tokio::test]
    async fn test_wrong_state_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = server(t.state);

        let response = server.post("/api/session/stop").await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "not_scanning");

        server.post("/api/session/start").await.assert_status_ok();
        let response = server.post("/api/session/start").await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ranging_failure_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        t.ranging.fail_next_start("service gone");
        let server = server(t.state.clone());

        let response = server.post("/api/session/start").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(t.state.controller.state(), ScanState::Idle);
    }
}
