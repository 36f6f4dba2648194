//! Subscription hub.
//!
//! The hub deduplicates live streams across clients: for every
//! (container, resource kind) pair at most one underlying stream is open,
//! however many clients asked for it, and it is torn down once nobody is
//! listening anymore.
//!
//! # Architecture
//!
//! ```text
//!  connections     HubCommand   ┌─────────────┐
//!  ──subscribe───┐  (one FIFO   │             │     ┌──────────────────┐
//!  ──unsubscribe─┼──channel)───▶│  Hub loop   │────▶│     Registry     │
//!  ──leave───────┤              │  (single)   │     │ key → [Resource] │
//!  ──relay───────┘              │             │     └────────┬─────────┘
//!                               └─────────────┘              │
//!                                                           ▼
//!  ┌──────────┐  Sample   ┌───────────────────┐  Arc<ResponseFrame>  ┌────────┐
//!  │ Streamer │──────────▶│ Resource fan-out  │────try_send─────────▶│ Client │
//!  └──────────┘           │ (one task each)   │                      │ queues │
//!                         └───────────────────┘                      └────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Delivery never blocks; full client queues drop, closed ones are pruned

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::Streamer;
use crate::inventory::Inventory;

mod actor;
mod client;
mod commands;
mod handle;
mod registry;
mod resource;

pub use actor::Hub;
pub use client::{Client, ClientId, Delivery};
pub use commands::{Demand, HubCommand, HubError};
pub use handle::HubHandle;
pub use registry::{Attach, Registry};
pub use resource::{Resource, ResourceStatus};

/// Default capacity of the hub command channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default capacity of a client's frame queue.
pub const DEFAULT_CLIENT_QUEUE: usize = 64;

/// Hub sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub channel_capacity: usize,
    pub client_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE,
        }
    }
}

/// Spawns the hub control loop and returns a handle to it.
///
/// The loop stops when `cancel` fires; every live Resource is quit on the
/// way out.
pub fn spawn_hub(
    inventory: Arc<dyn Inventory>,
    streamer: Arc<dyn Streamer>,
    config: HubConfig,
    cancel: CancellationToken,
) -> HubHandle {
    let (sender, receiver) = commands::channel(config.channel_capacity);
    let registry = Registry::new();

    let hub = Hub::new(receiver, registry.clone(), inventory, streamer, cancel);
    tokio::spawn(hub.run());

    HubHandle::new(sender, registry, config.client_queue_capacity)
}
