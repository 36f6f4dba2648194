//! Image identity and inventory snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::container::InventoryItem;

/// Engine-assigned image identifier, usually `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form without the digest prefix.
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        hex.get(..12).unwrap_or(hex)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An image known to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedImage {
    pub id: ImageId,

    /// `repo:tag` references; empty for dangling images.
    pub tags: Vec<String>,

    /// Size in bytes.
    pub size: i64,

    /// Build time, when the engine reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl TrackedImage {
    /// First tag, or the short id for untagged images.
    pub fn label(&self) -> &str {
        self.tags.first().map_or_else(|| self.id.short(), String::as_str)
    }

    /// Builds the persistence snapshot for this image.
    pub fn to_item(&self, changed_at: DateTime<Utc>) -> InventoryItem {
        InventoryItem::Image(ImageItem {
            id: self.id.clone(),
            tags: self.tags.clone(),
            size: self.size,
            changed_at,
        })
    }
}

/// One changed image entry, as handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: ImageId,
    pub tags: Vec<String>,
    pub size: i64,
    pub changed_at: DateTime<Utc>,
}
