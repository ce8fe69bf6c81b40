//! Shared types and OpenAPI schemas.
//!
//! Row types for the `beacons` table live here because both the pipeline
//! (writer) and the export API (reader) use them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::bluetooth::Beacon;

/// One stored beacon sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "sequence_id": 1,
    "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": "1",
    "minor": "513",
    "rssi": -67,
    "captured_at": 1700000000
}))]
pub struct BeaconObservation {
    /// Storage-assigned, strictly increasing row id (`sl`).
    pub sequence_id: i64,

    /// First identifier (`uid`).
    pub uuid: String,

    /// Second identifier (`major`).
    pub major: String,

    /// Third identifier (`minor`).
    pub minor: String,

    /// Signal strength in dBm.
    pub rssi: i32,

    /// Batch timestamp in Unix seconds (`timestamp`).
    pub captured_at: i64,
}

/// A sighting that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
    /// First identifier.
    pub uuid: String,
    /// Second identifier.
    pub major: String,
    /// Third identifier.
    pub minor: String,
    /// Signal strength in dBm.
    pub rssi: i32,
    /// Batch timestamp in Unix seconds.
    pub captured_at: i64,
}

impl NewObservation {
    /// Stamp `beacon` with the batch time.
    #[must_use]
    pub fn from_beacon(beacon: &Beacon, captured_at: i64) -> Self {
        let (uuid, major, minor) = beacon.identifiers();
        Self {
            uuid,
            major,
            minor,
            rssi: i32::from(beacon.rssi),
            captured_at,
        }
    }
}
