//! HTTP API routes and handlers.
//!
//! - `session` - Start/stop control and the control screen
//! - `preflight` - Permission preflight and the location prompt
//! - `backups` - Backup listing and download
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod backups;
pub mod error;
pub mod health;
pub mod openapi;
pub mod preflight;
pub mod session;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                       - Health check
/// /docs                         - Swagger UI
/// /api
/// ├── /session                  - Session state, toggle, start, stop
/// ├── /preflight                - Run the preflight
/// ├── /location-prompt          - Accept or dismiss the location prompt
/// ├── /backups                  - List and download backups
/// └── /openapi.json             - OpenAPI specification (served by Swagger UI)
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/session", session::router())
                .nest("/backups", backups::router())
                .merge(preflight::router()),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
