//! Container identity and inventory snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::image::{ImageId, ImageItem};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Engine-assigned container identifier.
///
/// Wraps the full 64-character hex id reported by the Docker engine
/// (short ids are accepted as-is; no validation is performed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new ContainerId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form used by the docker CLI.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Inventory-assigned identity of a tracked container.
///
/// The inventory hands out a fresh key the first time it tracks an id and
/// keeps it while the container is stopped and restarted. A container that
/// is removed and later tracked again gets a new key, so anything keyed by
/// `ContainerKey` never outlives the inventory entry it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerKey(u64);

impl ContainerKey {
    /// Creates a key from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Container State
// ============================================================================

/// Lifecycle state of a container as seen by the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Container is running.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// Container was destroyed; only appears in inventory change batches.
    Removed,
}

impl ContainerState {
    /// Returns the lowercase label used in logs and on the wire.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Tracked Container
// ============================================================================

/// A container known to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedContainer {
    /// Inventory identity (registry key for live streams).
    pub key: ContainerKey,

    /// Engine id.
    pub id: ContainerId,

    /// Container name without the leading slash.
    pub name: String,

    /// Image reference the container was created from.
    pub image: String,

    /// Id of the image, linking into the image inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ImageId>,

    /// Current lifecycle state.
    pub state: ContainerState,
}

impl TrackedContainer {
    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Builds the persistence snapshot for this container.
    pub fn to_item(&self, changed_at: DateTime<Utc>) -> InventoryItem {
        InventoryItem::Container(ContainerItem {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            state: self.state,
            changed_at,
        })
    }
}

/// One changed container entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItem {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub changed_at: DateTime<Utc>,
}

// ============================================================================
// Inventory Items
// ============================================================================

/// One changed inventory entry, as handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryItem {
    Container(ContainerItem),
    Image(ImageItem),
}

impl InventoryItem {
    /// Container snapshot, if this is one.
    pub fn as_container(&self) -> Option<&ContainerItem> {
        match self {
            Self::Container(item) => Some(item),
            Self::Image(_) => None,
        }
    }

    /// Image snapshot, if this is one.
    pub fn as_image(&self) -> Option<&ImageItem> {
        match self {
            Self::Image(item) => Some(item),
            Self::Container(_) => None,
        }
    }
}
