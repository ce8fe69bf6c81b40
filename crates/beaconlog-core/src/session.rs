//! The Idle/Scanning state machine behind the single start/stop control.
//!
//! State is held explicitly and only changed by [`ScanSessionController`]'s
//! transitions, which are serialized. Rotation runs after `unsubscribe` has
//! drained the writer, so the live file is never copied while rows are still
//! being inserted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::SessionConfig;
use crate::error::{BeaconLogError, Result};
use crate::permissions::{PermissionGate, PreflightReport};
use crate::pipeline::BeaconObservationPipeline;
use crate::rotation::{RotationOutcome, StorageRotation};
use crate::ui::{UiEvent, UiHandle, NOTICE_RANGING_FAILED};

/// Whether a range subscription is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Not scanning.
    #[default]
    Idle,
    /// A range subscription is active.
    Scanning,
}

impl ScanState {
    /// Label the control shows in this state.
    #[must_use]
    pub const fn control_label(self) -> &'static str {
        match self {
            Self::Idle => "Start",
            Self::Scanning => "Stop",
        }
    }
}

/// What `start` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StartReport {
    /// Preflight result gathered before subscribing.
    pub preflight: PreflightReport,
}

/// What `stop` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StopReport {
    /// Rotation outcome, absent when persistence is disabled.
    pub rotation: Option<RotationOutcome>,
}

/// What `toggle` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// A session was started.
    Started(StartReport),
    /// The running session was stopped.
    Stopped(StopReport),
}

/// Drives the scan session lifecycle.
pub struct ScanSessionController {
    gate: Arc<PermissionGate>,
    pipeline: Arc<BeaconObservationPipeline>,
    rotation: Arc<StorageRotation>,
    ui: UiHandle,
    config: SessionConfig,
    state: Mutex<ScanState>,
    transition: tokio::sync::Mutex<()>,
}

impl ScanSessionController {
    /// Create an idle controller.
    pub fn new(
        gate: Arc<PermissionGate>,
        pipeline: Arc<BeaconObservationPipeline>,
        rotation: Arc<StorageRotation>,
        ui: UiHandle,
        config: SessionConfig,
    ) -> Self {
        Self {
            gate,
            pipeline,
            rotation,
            ui,
            config,
            state: Mutex::new(ScanState::Idle),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ScanState) {
        *self.lock_state() = state;
    }

    /// Current state. Never waits on a transition in progress.
    #[must_use]
    pub fn state(&self) -> ScanState {
        *self.lock_state()
    }

    /// The permission gate used before every start.
    #[must_use]
    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    /// Run the preflight on its own.
    pub async fn preflight(&self) -> PreflightReport {
        self.gate.run().await
    }

    /// Begin a scan session.
    ///
    /// # Errors
    ///
    /// [`BeaconLogError::AlreadyScanning`] if a session is running,
    /// [`BeaconLogError::PrerequisitesNotMet`] if preflight failed and
    /// `require_prerequisites` is set, or the ranging error if ranging could
    /// not start.
    pub async fn start(&self) -> Result<StartReport> {
        let _transition = self.transition.lock().await;
        self.start_locked().await
    }

    /// End the scan session, rotating storage if persistence is on.
    ///
    /// # Errors
    ///
    /// [`BeaconLogError::NotScanning`] if no session is running.
    pub async fn stop(&self) -> Result<StopReport> {
        let _transition = self.transition.lock().await;
        self.stop_locked().await
    }

    /// Start when idle, stop when scanning.
    ///
    /// # Errors
    ///
    /// Whatever the chosen transition returns.
    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let _transition = self.transition.lock().await;
        match self.state() {
            ScanState::Idle => self.start_locked().await.map(ToggleOutcome::Started),
            ScanState::Scanning => self.stop_locked().await.map(ToggleOutcome::Stopped),
        }
    }

    /// Give up on every unanswered preflight prompt.
    ///
    /// A `start` waiting on one carries on with that step failed.
    pub fn cancel_pending(&self) {
        self.gate.cancel_pending();
    }

    /// Stop the session if one is running. Used on shutdown.
    ///
    /// Unanswered prompts are cancelled first so a `start` stuck on one
    /// cannot hold the transition lock forever.
    pub async fn shutdown(&self) -> Option<StopReport> {
        self.cancel_pending();
        let _transition = self.transition.lock().await;
        if self.state() == ScanState::Idle {
            return None;
        }
        self.stop_locked().await.ok()
    }

    async fn start_locked(&self) -> Result<StartReport> {
        if self.state() == ScanState::Scanning {
            return Err(BeaconLogError::AlreadyScanning);
        }

        let preflight = self.gate.run().await;
        if self.config.require_prerequisites && !preflight.all_passed() {
            let failed = preflight
                .failed_steps()
                .into_iter()
                .map(str::to_string)
                .collect();
            warn!("Refusing to start with missing prerequisites");
            return Err(BeaconLogError::PrerequisitesNotMet(failed));
        }

        self.set_state(ScanState::Scanning);
        if let Err(e) = self.pipeline.subscribe().await {
            self.set_state(ScanState::Idle);
            self.ui.notice(NOTICE_RANGING_FAILED);
            return Err(e.into());
        }

        self.ui.send(UiEvent::ControlLabel {
            state: ScanState::Scanning,
        });
        self.ui.send(UiEvent::ForegroundNotification {
            visible: true,
            title: self.config.notification_title.clone(),
        });
        info!("Scan session started");
        Ok(StartReport { preflight })
    }

    async fn stop_locked(&self) -> Result<StopReport> {
        if self.state() == ScanState::Idle {
            return Err(BeaconLogError::NotScanning);
        }

        self.pipeline.unsubscribe().await;
        let rotation = if self.config.persist {
            Some(self.rotation.commit_and_rotate().await)
        } else {
            None
        };

        self.set_state(ScanState::Idle);
        self.ui.send(UiEvent::ControlLabel {
            state: ScanState::Idle,
        });
        self.ui.send(UiEvent::ForegroundNotification {
            visible: false,
            title: self.config.notification_title.clone(),
        });
        info!("Scan session stopped");
        Ok(StopReport { rotation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{Beacon, Region};
    use crate::broker::AsyncResultBroker;
    use crate::clock::FixedClock;
    use crate::mock::{MockPlatform, MockRanging};
    use crate::storage::BeaconStore;
    use crate::types::NewObservation;
    use crate::ui::{NOTICE_DATABASE_SAVED, NOTICE_NO_DATABASE};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    struct Fixture {
        dir: TempDir,
        platform: Arc<MockPlatform>,
        ranging: Arc<MockRanging>,
        store: Arc<BeaconStore>,
        rotation: Arc<StorageRotation>,
        controller: ScanSessionController,
        rx: UnboundedReceiver<UiEvent>,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        fixture_on(Arc::new(MockPlatform::ready()), config)
    }

    fn fixture_on(platform: Arc<MockPlatform>, config: SessionConfig) -> Fixture {
        let dir = tempdir().unwrap();
        let ranging = Arc::new(MockRanging::new());
        let store = Arc::new(BeaconStore::new(dir.path().join("beaconlog")));
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let (ui, rx) = UiHandle::channel();

        let broker = Arc::new(AsyncResultBroker::new(platform.clone()));
        let gate = Arc::new(PermissionGate::new(broker, platform.clone(), ui.clone()));
        let pipeline = Arc::new(BeaconObservationPipeline::new(
            ranging.clone(),
            Arc::clone(&store),
            clock.clone(),
            Region::all("test"),
        ));
        let rotation = Arc::new(StorageRotation::new(Arc::clone(&store), clock, ui.clone()));
        let controller =
            ScanSessionController::new(gate, pipeline, Arc::clone(&rotation), ui, config);

        Fixture {
            dir,
            platform,
            ranging,
            store,
            rotation,
            controller,
            rx,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn beacon() -> Beacon {
        Beacon {
            id1: Uuid::nil(),
            id2: 1,
            id3: 2,
            rssi: -60,
            tx_power: -59,
        }
    }

    #[test]
    fn test_control_labels() {
        assert_eq!(ScanState::Idle.control_label(), "Start");
        assert_eq!(ScanState::Scanning.control_label(), "Stop");
        assert_eq!(ScanState::default(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_start_stop_without_live_file_creates_no_backup() {
        let mut f = fixture(SessionConfig::default());

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.state(), ScanState::Scanning);
        let report = f.controller.stop().await.unwrap();
        assert_eq!(report.rotation, Some(RotationOutcome::NothingToSave));
        assert_eq!(f.controller.state(), ScanState::Idle);

        assert_eq!(f.store.row_count().unwrap(), 0);
        assert!(f.rotation.list_backups().unwrap().is_empty());

        let events = drain(&mut f.rx);
        assert_eq!(
            events,
            vec![
                UiEvent::ControlLabel {
                    state: ScanState::Scanning
                },
                UiEvent::ForegroundNotification {
                    visible: true,
                    title: "Scanning for Beacons".into()
                },
                UiEvent::Notice {
                    text: NOTICE_NO_DATABASE.into()
                },
                UiEvent::ControlLabel {
                    state: ScanState::Idle
                },
                UiEvent::ForegroundNotification {
                    visible: false,
                    title: "Scanning for Beacons".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_start_stop_with_live_file_creates_one_backup() {
        let mut f = fixture(SessionConfig::default());
        f.store
            .insert(&NewObservation::from_beacon(&beacon(), 1))
            .unwrap();

        f.controller.start().await.unwrap();
        f.controller.stop().await.unwrap();

        assert_eq!(f.store.row_count().unwrap(), 0);
        assert_eq!(f.rotation.list_backups().unwrap().len(), 1);
        assert!(drain(&mut f.rx).contains(&UiEvent::Notice {
            text: NOTICE_DATABASE_SAVED.into()
        }));
    }

    #[tokio::test]
    async fn test_detections_end_up_in_backup() {
        let f = fixture(SessionConfig::default());
        f.controller.start().await.unwrap();
        f.ranging.deliver(vec![beacon(), beacon()]);
        let report = f.controller.stop().await.unwrap();

        let Some(RotationOutcome::Saved {
            backup,
            cleared_rows,
            ..
        }) = report.rotation
        else {
            panic!("expected a saved rotation");
        };
        assert_eq!(cleared_rows, 2);
        let copy = BeaconStore::new(f.dir.path().join(backup));
        assert_eq!(copy.row_count().unwrap(), 2);
        assert_eq!(f.store.row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_double_start_is_refused() {
        let f = fixture(SessionConfig::default());
        f.controller.start().await.unwrap();
        let err = f.controller.start().await.unwrap_err();
        assert!(matches!(err, BeaconLogError::AlreadyScanning));
        assert_eq!(f.ranging.notifier_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_refused() {
        let f = fixture(SessionConfig::default());
        let err = f.controller.stop().await.unwrap_err();
        assert!(matches!(err, BeaconLogError::NotScanning));
        assert_eq!(f.ranging.start_stop_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_ranging_failure_reverts_to_idle_with_notice() {
        let mut f = fixture(SessionConfig::default());
        f.ranging.fail_next_start("remote service gone");

        let err = f.controller.start().await.unwrap_err();
        assert!(matches!(err, BeaconLogError::RangingFailed(_)));
        assert_eq!(f.controller.state(), ScanState::Idle);
        assert_eq!(
            drain(&mut f.rx),
            vec![UiEvent::Notice {
                text: NOTICE_RANGING_FAILED.into()
            }]
        );

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.state(), ScanState::Scanning);
    }

    #[tokio::test]
    async fn test_failed_preflight_is_advisory_by_default() {
        let f = fixture(SessionConfig::default());
        f.platform.set_location_on(false);

        let report = f.controller.start().await.unwrap();
        assert!(!report.preflight.location_service_on);
        assert!(f.ranging.is_ranging());
    }

    #[tokio::test]
    async fn test_required_prerequisites_block_start() {
        let f = fixture(SessionConfig {
            require_prerequisites: true,
            ..SessionConfig::default()
        });
        f.platform.set_location_on(false);

        let err = f.controller.start().await.unwrap_err();
        match err {
            BeaconLogError::PrerequisitesNotMet(steps) => {
                assert_eq!(steps, vec!["location_service_on".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.controller.state(), ScanState::Idle);
        assert!(!f.ranging.is_ranging());
    }

    #[tokio::test]
    async fn test_non_persisting_stop_keeps_rows() {
        let f = fixture(SessionConfig {
            persist: false,
            ..SessionConfig::default()
        });
        f.controller.start().await.unwrap();
        f.ranging.deliver(vec![beacon()]);
        let report = f.controller.stop().await.unwrap();

        assert_eq!(report.rotation, None);
        assert_eq!(f.store.row_count().unwrap(), 1);
        assert!(f.rotation.list_backups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_alternates() {
        let f = fixture(SessionConfig::default());
        assert!(matches!(
            f.controller.toggle().await.unwrap(),
            ToggleOutcome::Started(_)
        ));
        assert!(matches!(
            f.controller.toggle().await.unwrap(),
            ToggleOutcome::Stopped(_)
        ));
        assert_eq!(f.ranging.start_stop_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_session() {
        let f = fixture(SessionConfig::default());
        assert!(f.controller.shutdown().await.is_none());

        f.controller.start().await.unwrap();
        assert!(f.controller.shutdown().await.is_some());
        assert_eq!(f.controller.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_releases_start_stuck_on_prompt() {
        // Location permission is asked for and never answered.
        let f = fixture_on(Arc::new(MockPlatform::new()), SessionConfig::default());

        let (started, stopped) = tokio::join!(f.controller.start(), async {
            while f.platform.issued_permission_ids().is_empty() {
                tokio::task::yield_now().await;
            }
            f.controller.shutdown().await
        });

        let report = started.unwrap();
        assert!(!report.preflight.location_permission);
        assert!(stopped.is_some());
        assert_eq!(f.controller.state(), ScanState::Idle);
        assert_eq!(f.ranging.start_stop_counts(), (1, 1));
    }
}
