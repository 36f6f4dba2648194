//! Hub commands and the values carried in them.
//!
//! Every input reaches the hub as a [`HubCommand`] on one FIFO channel, so
//! commands are applied in the order they were sent. A client that sends
//! subscribe, unsubscribe, subscribe ends up subscribed.

use thiserror::Error;
use tokio::sync::mpsc;

use dockmon_core::{ContainerId, ResourceKind, ResponseFrame};

use super::client::Client;

// ============================================================================
// Demand
// ============================================================================

/// A client's request to start or stop receiving one resource kind of one
/// container.
#[derive(Debug, Clone)]
pub struct Demand {
    pub kind: ResourceKind,
    pub container_id: ContainerId,
    pub client: Client,
}

impl Demand {
    pub fn new(kind: ResourceKind, container_id: impl Into<ContainerId>, client: Client) -> Self {
        Self {
            kind,
            container_id: container_id.into(),
            client,
        }
    }
}

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub control loop.
///
/// None of them carries a response channel: subscribe and unsubscribe are
/// best effort, and unknown containers are dropped without a reply.
#[derive(Debug)]
pub enum HubCommand {
    /// Add the demanding client to the Resource for `(container, kind)`,
    /// creating it if needed.
    Subscribe(Demand),

    /// Remove the demanding client from the Resource for `(container, kind)`.
    Unsubscribe(Demand),

    /// Remove a client from every Resource.
    Leave(Client),

    /// Deliver a frame to the receivers of the matching live Resource.
    Relay(ResponseFrame),
}

impl HubCommand {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Leave(_) => "leave",
            Self::Relay(_) => "relay",
        }
    }
}

/// Creates the hub command channel.
pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<HubCommand>, mpsc::Receiver<HubCommand>) {
    mpsc::channel(capacity.max(1))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// The hub control loop has stopped.
    #[error("hub channel closed")]
    ChannelClosed,
}
