//! Preflight checks run before scanning.
//!
//! Three steps run strictly in order: radio on, coarse-location permission,
//! location service on. A failing step is logged and the next one still
//! runs, so one pass reports every missing prerequisite. The gate itself
//! never refuses anything; the session controller decides what to do with
//! the report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::broker::{ActivityResult, AsyncResultBroker, ResultCode};
use crate::platform::{ActivityRequest, DeviceStatus, Grant, Permission};
use crate::ui::{UiEvent, UiHandle};

/// Per-step outcome of one preflight run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PreflightReport {
    /// The Bluetooth radio is on.
    pub radio_on: bool,
    /// Coarse location is granted.
    pub location_permission: bool,
    /// A location provider is enabled.
    pub location_service_on: bool,
}

impl PreflightReport {
    /// Whether every step passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.radio_on && self.location_permission && self.location_service_on
    }

    /// Names of the steps that failed, in run order.
    #[must_use]
    pub fn failed_steps(&self) -> Vec<&'static str> {
        [
            (self.radio_on, "radio_on"),
            (self.location_permission, "location_permission"),
            (self.location_service_on, "location_service_on"),
        ]
        .into_iter()
        .filter_map(|(ok, name)| (!ok).then_some(name))
        .collect()
    }
}

/// Sequential preflight built on the result broker.
pub struct PermissionGate {
    broker: Arc<AsyncResultBroker>,
    status: Arc<dyn DeviceStatus>,
    ui: UiHandle,
}

impl PermissionGate {
    /// Create a gate.
    pub fn new(broker: Arc<AsyncResultBroker>, status: Arc<dyn DeviceStatus>, ui: UiHandle) -> Self {
        Self { broker, status, ui }
    }

    /// Run all three steps in order.
    pub async fn run(&self) -> PreflightReport {
        let radio_on = self.ensure_radio_on().await;
        let location_permission = self.ensure_location_permission().await;
        let location_service_on = self.ensure_location_service_on().await;
        let report = PreflightReport {
            radio_on,
            location_permission,
            location_service_on,
        };
        if report.all_passed() {
            info!("Preflight passed");
        } else {
            warn!(failed = ?report.failed_steps(), "Preflight incomplete");
        }
        report
    }

    /// Make sure the radio is on, asking the host to enable it if needed.
    ///
    /// A missing handler, a cancelled request and any non-`Ok` code all count
    /// as failure.
    pub async fn ensure_radio_on(&self) -> bool {
        if self.status.radio_enabled().await {
            info!(radio_on = true, "Bluetooth already enabled");
            return true;
        }

        let result = self
            .broker
            .issue_activity_request(ActivityRequest::EnableBluetooth)
            .await;
        let on = matches!(
            result,
            Ok(Some(ActivityResult {
                code: ResultCode::Ok,
                ..
            }))
        );
        info!(radio_on = on, "Bluetooth enable request finished");
        on
    }

    /// Ask for coarse location. An empty answer means the prompt was dismissed.
    pub async fn ensure_location_permission(&self) -> bool {
        let granted = match self
            .broker
            .issue_permission_request(vec![Permission::CoarseLocation])
            .await
        {
            Ok(result) => result.grant_results.first() == Some(&Grant::Granted),
            Err(e) => {
                warn!(error = %e, "Location permission request abandoned");
                false
            }
        };
        info!(location_permission = granted, "Location permission checked");
        granted
    }

    /// Check the location service, prompting the user if it is off.
    ///
    /// The prompt is posted to the UI task and not awaited; this attempt
    /// reports `false` regardless of what the user picks.
    pub async fn ensure_location_service_on(&self) -> bool {
        let on = self.status.location_enabled().await;
        if !on {
            self.ui.send(UiEvent::LocationSettingsPrompt);
        }
        info!(location_service_on = on, "Location service checked");
        on
    }

    /// Open the system location settings without waiting for a result.
    ///
    /// Returns `false` when the host has nothing to open them with.
    pub fn open_location_settings(&self) -> bool {
        let host = self.broker.host();
        if host.can_resolve(ActivityRequest::LocationSettings) {
            host.start_activity(ActivityRequest::LocationSettings);
            true
        } else {
            warn!("No handler for location settings");
            false
        }
    }

    /// Abandon every prompt still waiting for an answer.
    ///
    /// Steps blocked on one resolve as failed.
    pub fn cancel_pending(&self) {
        self.broker.cancel_all();
    }
}
