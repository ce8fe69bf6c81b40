//! API error types and response handling.
//!
//! Every handler error becomes a JSON [`ErrorResponse`] with a status code
//! taken from the core error classification.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beaconlog_core::BeaconLogError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    #[error("Not Found: {message}")]
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - The session is already in the requested state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Current session state.
        state: Option<String>,
    },

    /// 412 Precondition Failed - Preflight steps that did not pass.
    #[error("Precondition Failed: {message}")]
    PreconditionFailed {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Names of the failed steps.
        failed_steps: Vec<String>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - Bluetooth or the time service is unavailable.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "already_scanning",
    "message": "A scan session is already running",
    "details": {"state": "scanning"}
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "not_scanning").
    #[schema(example = "not_scanning")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No scan session is running")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict {
                error_code,
                message,
                state,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: state.map(|s| serde_json::json!({ "state": s })),
                },
            ),

            Self::PreconditionFailed {
                error_code,
                message,
                failed_steps,
            } => (
                StatusCode::PRECONDITION_FAILED,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "failed_steps": failed_steps })),
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert from beaconlog_core errors.
impl From<BeaconLogError> for ApiError {
    fn from(err: BeaconLogError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();
        match err {
            BeaconLogError::AlreadyScanning => Self::Conflict {
                error_code,
                message,
                state: Some("scanning".to_string()),
            },
            BeaconLogError::NotScanning => Self::Conflict {
                error_code,
                message,
                state: Some("idle".to_string()),
            },
            BeaconLogError::PrerequisitesNotMet(failed_steps) => Self::PreconditionFailed {
                error_code,
                message,
                failed_steps,
            },
            BeaconLogError::BackupNotFound(_) | BeaconLogError::ConfigNotFound(_) => {
                Self::NotFound {
                    error_code,
                    message,
                }
            }
            e if e.http_status_code() == 503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<beaconlog_core::StorageError> for ApiError {
    fn from(err: beaconlog_core::StorageError) -> Self {
        Self::from(BeaconLogError::from(err))
    }
}
