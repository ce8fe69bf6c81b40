//! Application state shared across handlers.

use std::sync::Arc;

use beaconlog_core::{
    ActivityHost, AsyncResultBroker, BeaconObservationPipeline, BeaconStore, Clock, Config,
    DeviceStatus, NetworkClock, PermissionGate, RangingSource, ScanSessionController,
    StorageRotation, UiHandle,
};

use crate::ui::SharedView;

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// The host-side collaborators the core runs against.
pub struct Platform {
    /// Activity and permission API.
    pub host: Arc<dyn ActivityHost>,
    /// Radio and location status.
    pub status: Arc<dyn DeviceStatus>,
    /// Beacon ranging stack.
    pub ranging: Arc<dyn RangingSource>,
}

/// Everything the handlers need.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Start/stop state machine.
    pub controller: Arc<ScanSessionController>,
    /// Backup listing and export.
    pub rotation: Arc<StorageRotation>,
    /// The live database.
    pub store: Arc<BeaconStore>,
    /// What the control screen shows.
    pub view: SharedView,
    /// Network clock, when enabled.
    pub network_clock: Option<Arc<NetworkClock>>,
}

impl AppState {
    /// Wire the core components together.
    pub fn new(
        config: Config,
        platform: Platform,
        clock: Arc<dyn Clock>,
        network_clock: Option<Arc<NetworkClock>>,
        ui: UiHandle,
        view: SharedView,
    ) -> Self {
        let broker = Arc::new(AsyncResultBroker::new(platform.host));
        let gate = Arc::new(PermissionGate::new(broker, platform.status, ui.clone()));
        let store = Arc::new(BeaconStore::new(config.database_path()));
        let pipeline = Arc::new(BeaconObservationPipeline::new(
            platform.ranging,
            Arc::clone(&store),
            Arc::clone(&clock),
            config.region(),
        ));
        let rotation = Arc::new(StorageRotation::new(Arc::clone(&store), clock, ui.clone()));
        let controller = Arc::new(ScanSessionController::new(
            gate,
            pipeline,
            Arc::clone(&rotation),
            ui,
            config.session.clone(),
        ));

        Self {
            config,
            controller,
            rotation,
            store,
            view,
            network_clock,
        }
    }
}
