//! Lightweight host aggregates reported alongside the live streams.

use serde::{Deserialize, Serialize};

/// Engine version and object counts for the monitored host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub image_n: i64,
    pub container_n: i64,
}

/// One named volume on the host.
///
/// `used_by` and `size` are `-1` when the engine did not report usage data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: String,
    pub driver: String,
    pub created: String,
    pub used_by: i64,
    pub size: i64,
}

impl VolumeSummary {
    /// Value used for usage fields the engine left empty.
    pub const UNKNOWN_USAGE: i64 = -1;

    /// Returns true if at least one container references the volume.
    pub fn is_in_use(&self) -> bool {
        self.used_by > 0
    }
}
