//! Shared live stream for one (container, kind) pair.
//!
//! A `Resource` owns the cancellation token of exactly one underlying stream
//! and the list of clients its samples are fanned out to. Its fan-out task
//! ([`run`]) is the only consumer of the stream.
//!
//! # Teardown
//!
//! ```text
//!   sample ──▶ fan_out ──▶ remaining == 0 ? ──▶ Registry::reclaim ──▶ quit
//!                                 │                    │
//!                                 no                 refused (a receiver
//!                                 │                   joined meanwhile)
//!                                 ▼                    ▼
//!                            next sample          next sample
//!
//!   stream closed / open failed ──▶ quit ──▶ Registry::evict
//! ```
//!
//! A Resource with no receivers is only reclaimed when its stream produces
//! or closes. A stream that never produces keeps it registered.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockmon_core::{ContainerId, ResourceKind, ResponseFrame, TrackedContainer};

use super::client::{Client, ClientId, Delivery};
use super::registry::Registry;
use crate::engine::Streamer;

/// Point-in-time view of a Resource, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub instance: u64,
    pub container: ContainerId,
    pub kind: ResourceKind,
    pub receivers: Vec<ClientId>,
}

/// A shared stream and its receivers.
///
/// The receiver list has its own lock. Whoever needs both takes the
/// registry lock first and this one second; receivers are only added with
/// the registry write lock held, which keeps [`Registry::reclaim`] atomic.
pub struct Resource {
    instance: u64,
    container: TrackedContainer,
    kind: ResourceKind,
    receivers: RwLock<Vec<Client>>,
    cancel: CancellationToken,
}

impl Resource {
    pub(crate) fn new(
        instance: u64,
        container: TrackedContainer,
        kind: ResourceKind,
        first: Client,
    ) -> Self {
        Self {
            instance,
            container,
            kind,
            receivers: RwLock::new(vec![first]),
            cancel: CancellationToken::new(),
        }
    }

    /// Unique per created Resource; a resubscribe after teardown yields a
    /// different value.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn container(&self) -> &TrackedContainer {
        &self.container
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Stops the underlying stream. Idempotent.
    pub fn quit(&self) {
        self.cancel.cancel();
    }

    /// False once [`quit`](Self::quit) was called.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub async fn receiver_count(&self) -> usize {
        self.receivers.read().await.len()
    }

    /// Adds a receiver. Returns false if it was already present.
    ///
    /// Only called by the registry while it holds its write lock.
    pub(crate) async fn add_receiver(&self, client: Client) -> bool {
        let mut receivers = self.receivers.write().await;
        if receivers.contains(&client) {
            return false;
        }
        receivers.push(client);
        true
    }

    /// Removes a receiver. Returns false if it was not present.
    pub(crate) async fn remove_receiver(&self, id: ClientId) -> bool {
        let mut receivers = self.receivers.write().await;
        let before = receivers.len();
        receivers.retain(|c| c.id() != id);
        receivers.len() != before
    }

    /// Pushes `frame` to every receiver and returns how many remain.
    ///
    /// The read lock is held only for non-blocking pushes; receivers whose
    /// queue is closed are pruned afterwards.
    pub async fn fan_out(&self, frame: &Arc<ResponseFrame>) -> usize {
        let mut closed = Vec::new();
        let remaining = {
            let receivers = self.receivers.read().await;
            for client in receivers.iter() {
                match client.deliver(frame) {
                    Delivery::Sent => {}
                    Delivery::Dropped => {
                        debug!(
                            client_id = %client.id(),
                            container_id = %self.container.id,
                            kind = %self.kind,
                            "Client queue full, frame dropped"
                        );
                    }
                    Delivery::Closed => closed.push(client.id()),
                }
            }
            receivers.len()
        };

        if closed.is_empty() {
            return remaining;
        }

        let mut receivers = self.receivers.write().await;
        receivers.retain(|c| !closed.contains(&c.id()));
        debug!(
            pruned = closed.len(),
            container_id = %self.container.id,
            kind = %self.kind,
            "Pruned closed receivers"
        );
        receivers.len()
    }

    pub async fn status(&self) -> ResourceStatus {
        ResourceStatus {
            instance: self.instance,
            container: self.container.id.clone(),
            kind: self.kind,
            receivers: self.receivers.read().await.iter().map(Client::id).collect(),
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("instance", &self.instance)
            .field("container", &self.container.id)
            .field("kind", &self.kind)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Fan-out task of one Resource.
pub(crate) async fn run(resource: Arc<Resource>, registry: Registry, streamer: Arc<dyn Streamer>) {
    let container_id = resource.container.id.clone();
    let kind = resource.kind;

    let mut data = match streamer
        .open(&resource.container, kind, resource.cancel.clone())
        .await
    {
        Ok(data) => data,
        Err(e) => {
            warn!(container_id = %container_id, kind = %kind, error = %e, "Failed to open stream");
            resource.quit();
            registry.evict(&resource).await;
            return;
        }
    };

    info!(container_id = %container_id, kind = %kind, instance = resource.instance, "Stream opened");

    loop {
        let sample = tokio::select! {
            biased;
            _ = resource.cancel.cancelled() => None,
            sample = data.recv() => sample,
        };

        let Some(sample) = sample else {
            break;
        };

        let frame = Arc::new(ResponseFrame::new(container_id.clone(), kind, sample));
        let remaining = resource.fan_out(&frame).await;

        if remaining == 0 && registry.reclaim(&resource).await {
            resource.quit();
            info!(
                container_id = %container_id,
                kind = %kind,
                instance = resource.instance,
                "Resource reclaimed"
            );
            return;
        }
    }

    // stream closed or cancelled from outside
    resource.quit();
    registry.evict(&resource).await;
    info!(container_id = %container_id, kind = %kind, instance = resource.instance, "Stream closed");
}
