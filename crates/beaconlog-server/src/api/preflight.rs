//! Preflight and location-settings prompt endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beaconlog_core::ui::LOCATION_PROMPT_MESSAGE;
use beaconlog_core::PreflightReport;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the preflight router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/preflight", post(run_preflight))
        .route("/location-prompt/accept", post(accept_location_prompt))
        .route("/location-prompt/dismiss", post(dismiss_location_prompt))
}

/// Answer to the location-settings prompt.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "message": "Location needs to be turned on",
    "opened_settings": true
}))]
pub struct LocationPromptResponse {
    /// The prompt text that was answered.
    pub message: String,
    /// Whether the system location settings were opened.
    pub opened_settings: bool,
}

/// Clear the pending prompt, or fail when none is showing.
async fn take_prompt(state: &SharedState) -> ApiResult<()> {
    let mut view = state.view.write().await;
    if !view.location_prompt_pending {
        return Err(ApiError::Conflict {
            error_code: "no_location_prompt".to_string(),
            message: "No location prompt is pending".to_string(),
            state: None,
        });
    }
    view.location_prompt_pending = false;
    Ok(())
}

/// Run the permission preflight.
#[utoipa::path(
    post,
    path = "/api/preflight",
    tag = "preflight",
    operation_id = "runPreflight",
    summary = "Run the preflight",
    description = "Checks, in order, that the radio is on, that location \
        permission is granted and that location services are on. Each step may \
        ask the user; the report says which steps passed.",
    responses(
        (status = 200, description = "Preflight finished", body = PreflightReport)
    )
)]
pub async fn run_preflight(State(state): State<SharedState>) -> Json<PreflightReport> {
    Json(state.controller.preflight().await)
}

/// Open the system location settings, when the host can.
#[utoipa::path(
    post,
    path = "/api/location-prompt/accept",
    tag = "preflight",
    operation_id = "acceptLocationPrompt",
    summary = "Accept the location prompt",
    responses(
        (status = 200, description = "Prompt answered; `opened_settings` is false when no settings handler exists", body = LocationPromptResponse),
        (status = 409, description = "No prompt pending", body = super::error::ErrorResponse)
    )
)]
pub async fn accept_location_prompt(
    State(state): State<SharedState>,
) -> ApiResult<Json<LocationPromptResponse>> {
    take_prompt(&state).await?;
    let opened_settings = state.controller.gate().open_location_settings();
    Ok(Json(LocationPromptResponse {
        message: LOCATION_PROMPT_MESSAGE.to_string(),
        opened_settings,
    }))
}

/// Dismiss the location prompt.
#[utoipa::path(
    post,
    path = "/api/location-prompt/dismiss",
    tag = "preflight",
    operation_id = "dismissLocationPrompt",
    summary = "Dismiss the location prompt",
    responses(
        (status = 200, description = "Prompt dismissed", body = LocationPromptResponse),
        (status = 409, description = "No prompt pending", body = super::error::ErrorResponse)
    )
)]
pub async fn dismiss_location_prompt(
    State(state): State<SharedState>,
) -> ApiResult<Json<LocationPromptResponse>> {
    take_prompt(&state).await?;
    info!("Location not turned on");
    Ok(Json(LocationPromptResponse {
        message: LOCATION_PROMPT_MESSAGE.to_string(),
        opened_settings: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::mock_state;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use beaconlog_core::ActivityRequest;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_preflight_all_pass() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = TestServer::new(router().with_state(t.state)).unwrap();

        let report: PreflightReport = server.post("/preflight").await.json();
        assert!(report.all_passed());
    }

    #[tokio::test]
    async fn test_location_off_raises_prompt_then_accept_opens_settings() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        t.platform.set_location_on(false);
        let server = TestServer::new(router().with_state(t.state.clone())).unwrap();

        let report: PreflightReport = server.post("/preflight").await.json();
        assert!(!report.location_service_on);
        assert_eq!(report.failed_steps(), vec!["location_service_on"]);

        settle().await;
        assert!(t.state.view.read().await.location_prompt_pending);

        let body: LocationPromptResponse = server.post("/location-prompt/accept").await.json();
        assert!(body.opened_settings);
        assert!(!t.state.view.read().await.location_prompt_pending);
        assert!(t
            .platform
            .launched()
            .contains(&ActivityRequest::LocationSettings));
    }

    #[tokio::test]
    async fn test_accept_without_settings_handler_reports_not_opened() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        t.platform.set_location_on(false);
        t.platform
            .set_resolvable(ActivityRequest::LocationSettings, false);
        let server = TestServer::new(router().with_state(t.state.clone())).unwrap();

        server.post("/preflight").await.assert_status_ok();
        settle().await;

        let body: LocationPromptResponse = server.post("/location-prompt/accept").await.json();
        assert!(!body.opened_settings);
        assert!(!t.state.view.read().await.location_prompt_pending);
        assert!(t.platform.launched().is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_clears_prompt_without_opening_settings() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        t.platform.set_location_on(false);
        let server = TestServer::new(router().with_state(t.state.clone())).unwrap();

        server.post("/preflight").await.assert_status_ok();
        settle().await;

        let body: LocationPromptResponse = server.post("/location-prompt/dismiss").await.json();
        assert!(!body.opened_settings);
        assert!(!t.state.view.read().await.location_prompt_pending);
        assert!(!t
            .platform
            .launched()
            .contains(&ActivityRequest::LocationSettings));
    }

    #[tokio::test]
    async fn test_answer_without_prompt_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let t = mock_state(dir.path());
        let server = TestServer::new(router().with_state(t.state)).unwrap();

        server
            .post("/location-prompt/accept")
            .await
            .assert_status(StatusCode::CONFLICT);
    }
}
