//! # beaconlog-core
//!
//! Core logic for beaconlog, a Bluetooth LE beacon logger.
//!
//! This crate provides:
//! - Await-style wrappers over one-shot platform requests (enable radio,
//!   permission prompts)
//! - A sequential preflight before scanning
//! - Range batch to SQLite row persistence with a shared batch timestamp
//! - Snapshot-and-clear rotation of the live database
//! - The Idle/Scanning session state machine
//!
//! ## Architecture
//!
//! - [`broker`] - Request ids and futures for platform callbacks
//! - [`permissions`] - Radio, location permission and location service checks
//! - [`pipeline`] - Range notifier to storage writer
//! - [`rotation`] - Backup and clear of the live database
//! - [`session`] - Start/stop orchestration
//! - [`platform`] - Host platform traits and the BlueZ implementation
//! - [`bluetooth`] - iBeacon parsing, regions and the ranging stack
//! - [`clock`] - Local and SNTP-corrected time
//! - [`storage`] - The `beacons` table
//! - [`config`] - Configuration loading and validation
//! - [`ui`] - Events for the UI-owning task
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared row types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub mod mock;
pub mod permissions;
pub mod pipeline;
pub mod platform;
pub mod rotation;
pub mod session;
pub mod storage;
pub mod types;
pub mod ui;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezRanging;
pub use bluetooth::{Beacon, BluetoothError, BluetoothResult, RangingSource, Region};
pub use broker::{
    ActivityResult, AsyncResultBroker, BrokerError, PermissionResult, RequestId, RequestKind,
    ResultCode, ResultDispatcher,
};
pub use clock::{Clock, ClockError, FixedClock, NetworkClock, SystemClock};
pub use config::{
    default_config_path, ClockConfig, Config, ConfigError, ConfigResult, ScanConfig,
    ServerConfig, SessionConfig, StorageConfig,
};
pub use error::{BeaconLogError, Result};
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockPlatform, MockRanging};
pub use permissions::{PermissionGate, PreflightReport};
pub use pipeline::BeaconObservationPipeline;
#[cfg(feature = "bluetooth")]
pub use platform::BluezPlatform;
pub use platform::{ActivityHost, ActivityRequest, DeviceStatus, Grant, Permission};
pub use rotation::{BackupInfo, RotationOutcome, StorageRotation};
pub use session::{ScanSessionController, ScanState, StartReport, StopReport, ToggleOutcome};
pub use storage::{default_data_dir, BeaconStore, StorageError};
pub use types::{BeaconObservation, NewObservation};
pub use ui::{UiEvent, UiHandle};
