//! Health check API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beaconlog_core::ScanState;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "session": "idle",
    "network_time_synced": true
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Current scan session state.
    pub session: ScanState,

    /// Whether timestamps are network-corrected. Absent when the network
    /// clock is disabled.
    #[schema(nullable)]
    pub network_time_synced: Option<bool>,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns service status, version, session state and whether \
        network time has been synced.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session: state.controller.state(),
        network_time_synced: state.network_clock.as_ref().map(|c| c.is_synced()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use axum_test::TestServer;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            session: ScanState::Idle,
            network_time_synced: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"session\":\"idle\""));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = TestServer::new(router().with_state(t.state)).unwrap();

        let response = server.get("/").await;
        response.assert_status_ok();
        let body: HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.session, ScanState::Idle);
        assert_eq!(body.network_time_synced, None);
    }
}
