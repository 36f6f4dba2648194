//! Live resource kinds and the frames produced from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::container::ContainerId;
use crate::error::DomainError;

/// Kind of live stream a client can subscribe to for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Periodic resource usage samples (CPU, memory, network).
    Metrics,
    /// Followed log output, one line per sample.
    Logs,
}

impl ResourceKind {
    /// All kinds, in wire order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Metrics, ResourceKind::Logs];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metrics" => Ok(Self::Metrics),
            "logs" => Ok(Self::Logs),
            other => Err(DomainError::UnknownResourceKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// One item produced by an underlying stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample {
    pub content: serde_json::Value,
}

impl Sample {
    /// Wraps an arbitrary JSON payload.
    pub fn new(content: serde_json::Value) -> Self {
        Self { content }
    }

    /// Builds a sample from a single log line.
    pub fn log_line(line: impl Into<String>) -> Self {
        Self {
            content: serde_json::Value::String(line.into()),
        }
    }
}

/// Outbound unit of telemetry tagged with its origin.
///
/// Built once per sample and shared by reference between all receivers
/// of the producing resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Container the sample belongs to.
    pub cid: ContainerId,

    /// Resource kind that produced it.
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Raw sample payload.
    pub content: serde_json::Value,
}

impl ResponseFrame {
    /// Creates a frame for a sample.
    pub fn new(cid: ContainerId, kind: ResourceKind, sample: Sample) -> Self {
        Self {
            cid,
            kind,
            content: sample.content,
        }
    }
}
