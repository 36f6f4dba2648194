//! Container engine interfaces.
//!
//! The daemon talks to the engine through three narrow traits so the hub
//! and the controller can run against scripted fakes in tests:
//! - `EventSource` - live lifecycle notifications
//! - `Streamer` - one underlying metrics or log stream per resource
//! - `EngineInfo` - container discovery and host aggregates
//!
//! `DockerEngine` implements all three on top of `bollard`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dockmon_core::{
    ContainerId, EngineEvent, HostSummary, ImageId, ResourceKind, Sample, TrackedContainer,
    TrackedImage, VolumeSummary,
};

pub mod docker;
pub mod metrics;

pub use docker::DockerEngine;

/// Buffer between an engine stream and its consumer.
pub const STREAM_BUFFER: usize = 32;

/// Container fields reported by the engine before the inventory assigns a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub image_id: Option<ImageId>,
    pub running: bool,
}

/// Errors reported by engine collaborators.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine connection failed: {0}")]
    Connection(String),

    #[error("container not found: {0}")]
    NotFound(ContainerId),

    #[error("image not found: {0}")]
    ImageNotFound(ImageId),

    #[error("engine request failed: {0}")]
    Request(String),
}

/// Source of raw engine notifications.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens the live event feed. The channel closes when the engine
    /// connection ends.
    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;
}

/// Opens the underlying live stream of a resource.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Binds a stream of `kind` samples for `container`.
    ///
    /// The returned channel yields samples until the underlying stream
    /// ends or `cancel` fires; the producer must observe `cancel` and
    /// release its engine resources.
    async fn open(
        &self,
        container: &TrackedContainer,
        kind: ResourceKind,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Sample>, EngineError>;
}

/// Container discovery and host aggregates.
#[async_trait]
pub trait EngineInfo: Send + Sync {
    /// Engine version and object counts.
    async fn host_summary(&self) -> Result<HostSummary, EngineError>;

    /// Named volumes on the host.
    async fn volumes(&self) -> Result<Vec<VolumeSummary>, EngineError>;

    /// Containers currently running.
    async fn list_running(&self) -> Result<Vec<ContainerDetails>, EngineError>;

    /// Details of one container.
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, EngineError>;

    /// Top-level images on the host.
    async fn list_images(&self) -> Result<Vec<TrackedImage>, EngineError>;

    /// Details of one image.
    async fn inspect_image(&self, id: &ImageId) -> Result<TrackedImage, EngineError>;
}
