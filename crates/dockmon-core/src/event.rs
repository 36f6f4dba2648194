//! Engine notifications and the container lifecycle transitions they drive.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::container::ContainerId;

/// Object category of an engine notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Container,
    Image,
    Volume,
    Network,
    /// Any category the daemon does not act on (daemon, plugin, ...).
    Other(String),
}

impl EventCategory {
    /// Maps the engine's type string onto a category.
    pub fn from_engine(typ: &str) -> Self {
        match typ {
            "container" => Self::Container,
            "image" => Self::Image,
            "volume" => Self::Volume,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::Image => f.write_str("image"),
            Self::Volume => f.write_str("volume"),
            Self::Network => f.write_str("network"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// The fields of an engine notification the daemon consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Object category (`Type` on the engine wire).
    pub category: EventCategory,

    /// Status / action string, e.g. `start`, `stop`, `destroy`, `exec_start: sh`.
    pub status: String,

    /// Id of the object the event is about.
    pub id: ContainerId,
}

impl EngineEvent {
    /// Creates a container-category event.
    pub fn container(status: impl Into<String>, id: impl Into<ContainerId>) -> Self {
        Self {
            category: EventCategory::Container,
            status: status.into(),
            id: id.into(),
        }
    }

    /// Returns true if this event concerns a container.
    pub fn is_container(&self) -> bool {
        self.category == EventCategory::Container
    }
}

/// Inventory mutation implied by a container event.
///
/// | status    | action   |
/// |-----------|----------|
/// | `start`   | `Add`    |
/// | `stop`    | `Stop`   |
/// | `destroy` | `Remove` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Add,
    Stop,
    Remove,
}

impl LifecycleAction {
    /// Classifies a container event status; `None` for statuses the
    /// daemon does not act on.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "start" => Some(Self::Add),
            "stop" => Some(Self::Stop),
            "destroy" => Some(Self::Remove),
            _ => None,
        }
    }

    /// Returns a short verb for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Stop => "stop",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
