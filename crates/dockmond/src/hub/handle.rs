//! Client interface for interacting with the hub.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `HubError::ChannelClosed`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use dockmon_core::{ContainerId, ResourceKind, ResponseFrame};

use super::client::{Client, ClientId};
use super::commands::{Demand, HubCommand, HubError};
use super::registry::Registry;
use super::resource::ResourceStatus;

/// Cheap-to-clone handle to a running hub.
///
/// All methods send on the same command channel, so the hub applies calls
/// from one task in the order they were made.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    registry: Registry,
    next_client: Arc<AtomicU64>,
    client_capacity: usize,
}

impl HubHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<HubCommand>,
        registry: Registry,
        client_capacity: usize,
    ) -> Self {
        Self {
            sender,
            registry,
            next_client: Arc::new(AtomicU64::new(1)),
            client_capacity,
        }
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Creates a client for a new connection.
    ///
    /// The returned receiver must be drained by exactly one writer; dropping
    /// it makes the client prunable by every Resource it is registered on.
    pub fn create_client(&self) -> (Client, mpsc::Receiver<Arc<ResponseFrame>>) {
        let id = ClientId::new(self.next_client.fetch_add(1, Ordering::Relaxed));
        Client::new(id, self.client_capacity)
    }

    /// Queues a subscribe demand. Unknown containers are dropped by the hub
    /// without any reply.
    pub async fn subscribe(
        &self,
        client: &Client,
        container_id: impl Into<ContainerId>,
        kind: ResourceKind,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Subscribe(Demand::new(
            kind,
            container_id,
            client.clone(),
        )))
        .await
    }

    pub async fn unsubscribe(
        &self,
        client: &Client,
        container_id: impl Into<ContainerId>,
        kind: ResourceKind,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Unsubscribe(Demand::new(
            kind,
            container_id,
            client.clone(),
        )))
        .await
    }

    /// Removes `client` from every Resource.
    pub async fn leave(&self, client: &Client) -> Result<(), HubError> {
        self.send(HubCommand::Leave(client.clone())).await
    }

    /// Delivers a frame to the receivers of the matching live Resource.
    pub async fn relay(&self, frame: ResponseFrame) -> Result<(), HubError> {
        self.send(HubCommand::Relay(frame)).await
    }

    /// Snapshot of the live Resources, ordered by creation.
    pub async fn resources(&self) -> Vec<ResourceStatus> {
        self.registry.snapshot().await
    }

    /// Returns true while the hub control loop is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
