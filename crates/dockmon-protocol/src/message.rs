//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use dockmon_core::{HostSummary, ResponseFrame, TrackedContainer, TrackedImage, VolumeSummary};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Start receiving frames of one resource kind for one container.
    ///
    /// `resource` is kept as a raw string: unknown kinds and unknown
    /// containers are dropped without a reply.
    Subscribe {
        container_id: String,
        resource: String,
    },

    /// Stop receiving frames of one resource kind for one container.
    Unsubscribe {
        container_id: String,
        resource: String,
    },

    /// Request the tracked container list
    ListContainers,

    /// Request one container and its image. Accepts a unique id prefix.
    GetContainer { container_id: String },

    /// Request the tracked image list
    ListImages,

    /// Request the host summary and volume list
    GetSummary,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    /// Creates a subscribe message.
    pub fn subscribe(container_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(MessageType::Subscribe {
            container_id: container_id.into(),
            resource: resource.into(),
        })
    }

    /// Creates an unsubscribe message.
    pub fn unsubscribe(container_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(MessageType::Unsubscribe {
            container_id: container_id.into(),
            resource: resource.into(),
        })
    }

    /// Creates a container list request.
    pub fn list_containers() -> Self {
        Self::new(MessageType::ListContainers)
    }

    /// Creates a single container request.
    pub fn get_container(container_id: impl Into<String>) -> Self {
        Self::new(MessageType::GetContainer {
            container_id: container_id.into(),
        })
    }

    /// Creates an image list request.
    pub fn list_images() -> Self {
        Self::new(MessageType::ListImages)
    }

    /// Creates a host summary request.
    pub fn get_summary() -> Self {
        Self::new(MessageType::GetSummary)
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// One sample from a subscribed resource
    Frame {
        frame: ResponseFrame,
    },

    /// Tracked containers
    ContainerList {
        containers: Vec<TrackedContainer>,
    },

    /// One container, with its image when the image is tracked
    Container {
        container: TrackedContainer,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<TrackedImage>,
    },

    /// Tracked images
    ImageList {
        images: Vec<TrackedImage>,
    },

    /// Host summary and volumes
    Summary {
        summary: HostSummary,
        volumes: Vec<VolumeSummary>,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Wraps a resource frame.
    pub fn frame(frame: ResponseFrame) -> Self {
        Self::Frame { frame }
    }

    /// Creates a container list response.
    pub fn container_list(containers: Vec<TrackedContainer>) -> Self {
        Self::ContainerList { containers }
    }

    /// Creates a single container response.
    pub fn container(container: TrackedContainer, image: Option<TrackedImage>) -> Self {
        Self::Container { container, image }
    }

    /// Creates an image list response.
    pub fn image_list(images: Vec<TrackedImage>) -> Self {
        Self::ImageList { images }
    }

    /// Creates a summary response.
    pub fn summary(summary: HostSummary, volumes: Vec<VolumeSummary>) -> Self {
        Self::Summary { summary, volumes }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with a machine-readable code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}
