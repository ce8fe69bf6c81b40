//! Bluetooth Low Energy beacon ranging.
//!
//! This module provides:
//! - iBeacon advertisement parsing
//! - Region filters over the beacon identifier triple
//! - The [`RangingSource`] seam that delivers one detection batch per scan period
//! - A BlueZ implementation (behind the `bluetooth` feature)

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::platform::BoxFuture;

/// Apple's Bluetooth SIG company identifier.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon type and length bytes that follow the company identifier.
pub const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Length of the iBeacon manufacturer payload after the company identifier.
pub const IBEACON_PAYLOAD_LEN: usize = 23;

/// Errors from the ranging stack.
#[derive(Debug, Clone, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Connecting to the Bluetooth daemon failed.
    #[error("Failed to initialise Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error message.
        message: String,
    },

    /// The ranging service refused to start.
    #[error("Failed to start beacon ranging: {message}")]
    RangingFailed {
        /// Underlying error message.
        message: String,
    },

    /// Anything else reported by the Bluetooth stack.
    #[error("Bluetooth error: {message}")]
    Internal {
        /// Underlying error message.
        message: String,
    },
}

/// Result type for Bluetooth operations.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// A single beacon sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Beacon {
    /// Proximity UUID (first identifier).
    pub id1: Uuid,
    /// Major (second identifier).
    pub id2: u16,
    /// Minor (third identifier).
    pub id3: u16,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Calibrated transmit power at 1 m in dBm.
    pub tx_power: i8,
}

impl Beacon {
    /// The identifier triple as stored: lowercase UUID, decimal major and minor.
    #[must_use]
    pub fn identifiers(&self) -> (String, String, String) {
        (
            self.id1.hyphenated().to_string(),
            self.id2.to_string(),
            self.id3.to_string(),
        )
    }

    /// Key identifying the physical beacon, ignoring signal readings.
    #[must_use]
    pub fn key(&self) -> (Uuid, u16, u16) {
        (self.id1, self.id2, self.id3)
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({} dBm)",
            self.id1.hyphenated(),
            self.id2,
            self.id3,
            self.rssi
        )
    }
}

/// Parse iBeacon manufacturer data.
///
/// `data` is the manufacturer-specific payload with the company identifier
/// already stripped, as BlueZ reports it. Returns `None` for anything that is
/// not an iBeacon frame.
#[must_use]
pub fn parse_ibeacon(company_id: u16, data: &[u8], rssi: i16) -> Option<Beacon> {
    if company_id != APPLE_COMPANY_ID || data.len() < IBEACON_PAYLOAD_LEN {
        return None;
    }
    if data[..2] != IBEACON_PREFIX {
        return None;
    }
    let id1 = Uuid::from_slice(&data[2..18]).ok()?;
    let id2 = u16::from_be_bytes([data[18], data[19]]);
    let id3 = u16::from_be_bytes([data[20], data[21]]);
    let tx_power = i8::from_be_bytes([data[22]]);
    Some(Beacon {
        id1,
        id2,
        id3,
        rssi,
        tx_power,
    })
}

/// Identifier filter for ranging. `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Name of the region.
    pub unique_id: String,
    /// Proximity UUID filter.
    pub id1: Option<Uuid>,
    /// Major filter.
    pub id2: Option<u16>,
    /// Minor filter.
    pub id3: Option<u16>,
}

impl Region {
    /// A region matching every beacon.
    #[must_use]
    pub fn all(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            id1: None,
            id2: None,
            id3: None,
        }
    }

    /// Whether `beacon` falls inside this region.
    #[must_use]
    pub fn matches(&self, beacon: &Beacon) -> bool {
        self.id1.map_or(true, |id| id == beacon.id1)
            && self.id2.map_or(true, |id| id == beacon.id2)
            && self.id3.map_or(true, |id| id == beacon.id3)
    }
}

/// Callback receiving one detection batch per scan period.
///
/// Called on the ranging stack's own task; it must return promptly.
pub type RangeNotifier = Arc<dyn Fn(Vec<Beacon>, &Region) + Send + Sync>;

/// The beacon detection stack.
///
/// Notifiers are additive: adding the same logical consumer twice makes it
/// see every batch twice.
pub trait RangingSource: Send + Sync {
    /// Register a batch callback.
    fn add_range_notifier(&self, notifier: RangeNotifier);

    /// Drop every registered callback.
    fn remove_all_range_notifiers(&self);

    /// Begin periodic batch delivery for `region`.
    fn start_ranging(&self, region: Region) -> BoxFuture<'_, BluetoothResult<()>>;

    /// Stop batch delivery for `region`.
    fn stop_ranging(&self, region: &Region) -> BoxFuture<'_, BluetoothResult<()>>;
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluezRanging;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use bluer::{Adapter, AdapterEvent, Address};
    use futures::StreamExt;
    use tokio::task::JoinHandle;
    use tokio::time::MissedTickBehavior;
    use tracing::{debug, info, trace, warn};
    use uuid::Uuid;

    use super::{
        parse_ibeacon, Beacon, BluetoothError, BluetoothResult, BoxFuture, RangeNotifier,
        RangingSource, Region,
    };
    use crate::config::ScanConfig;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    type Notifiers = std::sync::Arc<Mutex<Vec<RangeNotifier>>>;

    /// Ranging over BlueZ discovery events.
    ///
    /// Each scan period collects the latest reading per beacon and hands the
    /// batch to every notifier, then waits the between-scan period.
    pub struct BluezRanging {
        adapter: Adapter,
        scan_period: Duration,
        between_scan_period: Duration,
        notifiers: Notifiers,
        task: Mutex<Option<JoinHandle<()>>>,
    }

    impl BluezRanging {
        /// Create a ranging source on `adapter`.
        #[must_use]
        pub fn new(adapter: Adapter, scan: &ScanConfig) -> Self {
            Self {
                adapter,
                scan_period: Duration::from_millis(scan.scan_period_ms),
                between_scan_period: Duration::from_millis(scan.between_scan_period_ms),
                notifiers: Notifiers::default(),
                task: Mutex::new(None),
            }
        }

        async fn read_beacon(adapter: &Adapter, address: Address) -> Option<Beacon> {
            let device = adapter.device(address).ok()?;
            let rssi = device.rssi().await.ok().flatten()?;
            let data = device.manufacturer_data().await.ok().flatten()?;
            data.iter()
                .find_map(|(company, payload)| parse_ibeacon(*company, payload, rssi))
        }
    }

    impl RangingSource for BluezRanging {
        fn add_range_notifier(&self, notifier: RangeNotifier) {
            lock(&self.notifiers).push(notifier);
        }

        fn remove_all_range_notifiers(&self) {
            lock(&self.notifiers).clear();
        }

        fn start_ranging(&self, region: Region) -> BoxFuture<'_, BluetoothResult<()>> {
            Box::pin(async move {
                if !self.adapter.is_powered().await.unwrap_or(false) {
                    return Err(BluetoothError::AdapterPoweredOff);
                }
                let events = self
                    .adapter
                    .discover_devices_with_changes()
                    .await
                    .map_err(|e| BluetoothError::RangingFailed {
                        message: e.to_string(),
                    })?;

                let adapter = self.adapter.clone();
                let notifiers = self.notifiers.clone();
                let scan_period = self.scan_period;
                let between = self.between_scan_period;
                info!(region = %region.unique_id, ?scan_period, "Starting beacon ranging");

                let handle = tokio::spawn(async move {
                    let mut events = Box::pin(events);
                    let mut seen: HashMap<(Uuid, u16, u16), Beacon> = HashMap::new();
                    let mut ticker = tokio::time::interval(scan_period + between);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            event = events.next() => match event {
                                Some(AdapterEvent::DeviceAdded(address)) => {
                                    if let Some(beacon) = Self::read_beacon(&adapter, address).await {
                                        if region.matches(&beacon) {
                                            trace!(%beacon, "Beacon sighted");
                                            seen.insert(beacon.key(), beacon);
                                        }
                                    }
                                }
                                Some(_) => {}
                                None => {
                                    warn!("Discovery stream ended");
                                    break;
                                }
                            },
                            _ = ticker.tick() => {
                                let batch: Vec<Beacon> = seen.drain().map(|(_, b)| b).collect();
                                let current = lock(&notifiers).clone();
                                debug!(beacons = batch.len(), "Delivering range batch");
                                for notifier in &current {
                                    notifier(batch.clone(), &region);
                                }
                            }
                        }
                    }
                });

                if let Some(previous) = lock(&self.task).replace(handle) {
                    previous.abort();
                }
                Ok(())
            })
        }

        fn stop_ranging(&self, region: &Region) -> BoxFuture<'_, BluetoothResult<()>> {
            let unique_id = region.unique_id.clone();
            Box::pin(async move {
                if let Some(handle) = lock(&self.task).take() {
                    handle.abort();
                    info!(region = %unique_id, "Stopped beacon ranging");
                }
                Ok(())
            })
        }
    }

    impl Drop for BluezRanging {
        fn drop(&mut self) {
            if let Some(handle) = lock(&self.task).take() {
                handle.abort();
            }
        }
    }
}
