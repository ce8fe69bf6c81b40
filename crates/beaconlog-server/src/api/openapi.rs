//! OpenAPI specification for the beaconlog API.
//!
//! Swagger UI serves the document at `/api/openapi.json` and renders it at
//! `/docs`; the `gen-openapi` binary writes it to disk.

use beaconlog_core::{
    BackupInfo, PreflightReport, RotationOutcome, ScanState, StartReport, StopReport,
    ToggleOutcome,
};
use utoipa::OpenApi;

use super::backups::BackupListResponse;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::preflight::LocationPromptResponse;
use super::session::SessionResponse;
use crate::ui::Notice;

/// The specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for beaconlog.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beaconlog API",
        version = "0.1.0",
        description = r#"
# beaconlog API

beaconlog records every beacon it ranges into a local SQLite database.

## Overview

A session is driven by one control:

1. **Start**: the preflight checks the radio, location permission and location
   services, then ranging begins and every detection is stored with a
   timestamp.
2. **Stop**: ranging ends, the live database is copied to a timestamped backup
   and the live table is cleared.

Backups can be listed and downloaded. Recent notices, the control label and the
foreground notification are part of the session state.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beaconlog daemon")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "session", description = "Start and stop scan sessions"),
        (name = "preflight", description = "Radio, permission and location checks"),
        (name = "backups", description = "Database backups written on stop")
    ),
    paths(
        super::health::health_check,
        super::session::get_session,
        super::session::toggle_session,
        super::session::start_session,
        super::session::stop_session,
        super::preflight::run_preflight,
        super::preflight::accept_location_prompt,
        super::preflight::dismiss_location_prompt,
        super::backups::list_backups,
        super::backups::download_backup,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Session types
            ScanState,
            SessionResponse,
            Notice,
            StartReport,
            StopReport,
            ToggleOutcome,
            // Preflight types
            PreflightReport,
            LocationPromptResponse,
            // Backup types
            RotationOutcome,
            BackupInfo,
            BackupListResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "beaconlog API");
        assert!(spec.paths.paths.contains_key("/api/session/toggle"));
        assert!(spec.paths.paths.contains_key("/api/backups/{name}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"beaconlog API\""));
    }
}
