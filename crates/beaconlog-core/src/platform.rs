//! Host platform seams.
//!
//! The activity/permission API and the radio/location status queries are
//! owned by the host OS. This module describes them as traits so the broker
//! and the permission gate can be driven by BlueZ in production and by
//! [`crate::mock::MockPlatform`] in tests.

use std::fmt;

pub use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::broker::{ActivityResult, PermissionResult, RequestId, ResultCode, ResultDispatcher};

/// One-shot system interactions that may produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityRequest {
    /// Ask the user to switch the Bluetooth radio on.
    EnableBluetooth,
    /// Open the system location settings.
    LocationSettings,
}

/// Runtime capabilities the logger may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Coarse location, required for BLE scanning on mobile platforms.
    CoarseLocation,
    /// Fine location.
    FineLocation,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoarseLocation => f.write_str("ACCESS_COARSE_LOCATION"),
            Self::FineLocation => f.write_str("ACCESS_FINE_LOCATION"),
        }
    }
}

/// Outcome of a single permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    /// The permission is held.
    Granted,
    /// The permission was refused or never asked for.
    Denied,
}

/// The host's activity and permission API.
///
/// Implementations must deliver exactly one completion per issued id through
/// the supplied [`ResultDispatcher`], either synchronously from inside the call
/// or later from any thread.
pub trait ActivityHost: Send + Sync {
    /// Whether any handler exists for `request`.
    fn can_resolve(&self, request: ActivityRequest) -> bool;

    /// Launch `request` and report its result under `id`.
    fn start_activity_for_result(
        &self,
        request: ActivityRequest,
        id: RequestId,
        dispatcher: ResultDispatcher,
    );

    /// Launch `request` without waiting for any result.
    fn start_activity(&self, request: ActivityRequest);

    /// Whether the platform prompts for permissions at runtime.
    ///
    /// When `false` every permission is implicitly held.
    fn runtime_permissions(&self) -> bool;

    /// Current grant state of `permission`.
    fn check_permission(&self, permission: Permission) -> Grant;

    /// Prompt for `permissions` and report the answer under `id`.
    fn request_permissions(
        &self,
        permissions: Vec<Permission>,
        id: RequestId,
        dispatcher: ResultDispatcher,
    );
}

/// Live device state consulted by the permission gate.
pub trait DeviceStatus: Send + Sync {
    /// Whether the Bluetooth radio is on.
    fn radio_enabled(&self) -> BoxFuture<'_, bool>;

    /// Whether at least one location provider is enabled.
    fn location_enabled(&self) -> BoxFuture<'_, bool>;
}

/// An all-granted answer for `permissions`, used when no prompt is needed.
#[must_use]
pub fn granted(permissions: Vec<Permission>) -> PermissionResult {
    let grant_results = vec![Grant::Granted; permissions.len()];
    PermissionResult {
        permissions,
        grant_results,
    }
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluezPlatform;

#[cfg(feature = "bluetooth")]
mod bluez {
    use bluer::{Adapter, Session};
    use tracing::{debug, info, warn};

    use super::{
        granted, ActivityHost, ActivityRequest, ActivityResult, BoxFuture, DeviceStatus, Grant,
        Permission, RequestId, ResultCode, ResultDispatcher,
    };
    use crate::bluetooth::{BluetoothError, BluezRanging};
    use crate::config::ScanConfig;

    /// BlueZ-backed platform.
    ///
    /// Linux has no runtime permission prompts and BLE scanning does not depend
    /// on a location service, so only the radio is ever really in question.
    pub struct BluezPlatform {
        _session: Session,
        adapter: Adapter,
    }

    impl BluezPlatform {
        /// Connect to `bluetoothd` and pick the default adapter.
        ///
        /// # Errors
        ///
        /// Returns an error if the D-Bus session cannot be opened or no adapter
        /// is present.
        pub async fn new() -> Result<Self, BluetoothError> {
            let session = Session::new()
                .await
                .map_err(|e| BluetoothError::SessionInitFailed {
                    message: e.to_string(),
                })?;
            let adapter = session
                .default_adapter()
                .await
                .map_err(|_| BluetoothError::AdapterNotFound)?;
            info!(adapter = adapter.name(), "Using Bluetooth adapter");
            Ok(Self {
                _session: session,
                adapter,
            })
        }

        /// A ranging source sharing this platform's adapter.
        #[must_use]
        pub fn ranging(&self, scan: &ScanConfig) -> BluezRanging {
            BluezRanging::new(self.adapter.clone(), scan)
        }
    }

    impl ActivityHost for BluezPlatform {
        fn can_resolve(&self, request: ActivityRequest) -> bool {
            matches!(request, ActivityRequest::EnableBluetooth)
        }

        fn start_activity_for_result(
            &self,
            request: ActivityRequest,
            id: RequestId,
            dispatcher: ResultDispatcher,
        ) {
            let adapter = self.adapter.clone();
            tokio::spawn(async move {
                let code = match request {
                    ActivityRequest::EnableBluetooth => match adapter.set_powered(true).await {
                        Ok(()) => ResultCode::Ok,
                        Err(e) => {
                            warn!(error = %e, "Failed to power on Bluetooth adapter");
                            ResultCode::Canceled
                        }
                    },
                    ActivityRequest::LocationSettings => ResultCode::Canceled,
                };
                dispatcher.on_activity_result(id, ActivityResult { code, data: None });
            });
        }

        fn start_activity(&self, request: ActivityRequest) {
            debug!(?request, "No handler for activity on this host");
        }

        fn runtime_permissions(&self) -> bool {
            false
        }

        fn check_permission(&self, _permission: Permission) -> Grant {
            Grant::Granted
        }

        fn request_permissions(
            &self,
            permissions: Vec<Permission>,
            id: RequestId,
            dispatcher: ResultDispatcher,
        ) {
            dispatcher.on_permission_result(id, granted(permissions));
        }
    }

    impl DeviceStatus for BluezPlatform {
        fn radio_enabled(&self) -> BoxFuture<'_, bool> {
            Box::pin(async move { self.adapter.is_powered().await.unwrap_or(false) })
        }

        fn location_enabled(&self) -> BoxFuture<'_, bool> {
            Box::pin(async { true })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_matches_permission_count() {
        let result = granted(vec![Permission::CoarseLocation, Permission::FineLocation]);
        assert_eq!(result.grant_results, vec![Grant::Granted, Grant::Granted]);
        assert_eq!(result.permissions.len(), 2);
    }

    #[test]
    fn test_permission_display_uses_platform_names() {
        assert_eq!(
            Permission::CoarseLocation.to_string(),
            "ACCESS_COARSE_LOCATION"
        );
    }

    #[test]
    fn test_permission_serializes_screaming_case() {
        let json = serde_json::to_string(&Permission::CoarseLocation).unwrap();
        assert_eq!(json, "\"COARSE_LOCATION\"");
    }
}
