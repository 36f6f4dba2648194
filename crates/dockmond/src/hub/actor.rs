//! Hub control loop.
//!
//! A single task drains the command channel, so registry changes made on
//! behalf of clients are applied one at a time in send order. Handlers only
//! do a short inventory lookup and a registry update; stream work happens in
//! the Resources' own fan-out tasks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use dockmon_core::{ContainerId, ResourceKind, ResponseFrame};

use super::client::Client;
use super::commands::{Demand, HubCommand};
use super::registry::{Attach, Registry};
use super::resource::{self, Resource};
use crate::engine::Streamer;
use crate::inventory::Inventory;

pub struct Hub {
    receiver: mpsc::Receiver<HubCommand>,
    registry: Registry,
    inventory: Arc<dyn Inventory>,
    streamer: Arc<dyn Streamer>,
    cancel: CancellationToken,
}

impl Hub {
    pub(crate) fn new(
        receiver: mpsc::Receiver<HubCommand>,
        registry: Registry,
        inventory: Arc<dyn Inventory>,
        streamer: Arc<dyn Streamer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            registry,
            inventory,
            streamer,
            cancel,
        }
    }

    /// Runs until cancelled or every handle is dropped, then quits all
    /// Resources.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            let cmd = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Hub shutdown requested");
                    break;
                }

                cmd = self.receiver.recv() => cmd,
            };

            let Some(cmd) = cmd else {
                debug!("All hub handles dropped");
                break;
            };
            self.handle_command(cmd).await;
        }

        self.registry.shutdown().await;
        info!("Hub stopped");
    }

    async fn handle_command(&self, cmd: HubCommand) {
        trace!(command = cmd.name(), "Hub command");
        match cmd {
            HubCommand::Subscribe(demand) => self.subscribe(demand).await,
            HubCommand::Unsubscribe(demand) => self.unsubscribe(demand).await,
            HubCommand::Leave(client) => self.client_leave(&client).await,
            HubCommand::Relay(frame) => self.relay(frame).await,
        }
    }

    async fn subscribe(&self, demand: Demand) {
        let Demand {
            kind,
            container_id,
            client,
        } = demand;

        let Some(container) = self.inventory.container_get(&container_id).await else {
            debug!(
                container_id = %container_id,
                kind = %kind,
                client_id = %client.id(),
                "Subscribe for unknown container dropped"
            );
            return;
        };

        let client_id = client.id();
        match self.registry.attach(&container, kind, client).await {
            Attach::Created(created) => {
                info!(
                    container_id = %container.id,
                    kind = %kind,
                    client_id = %client_id,
                    instance = created.instance(),
                    "Resource created"
                );
                tokio::spawn(resource::run(
                    created,
                    self.registry.clone(),
                    Arc::clone(&self.streamer),
                ));
            }
            Attach::Joined(joined) => {
                debug!(
                    container_id = %container.id,
                    kind = %kind,
                    client_id = %client_id,
                    instance = joined.instance(),
                    "Receiver joined"
                );
            }
            Attach::AlreadyPresent(_) => {
                debug!(
                    container_id = %container.id,
                    kind = %kind,
                    client_id = %client_id,
                    "Duplicate subscribe ignored"
                );
            }
        }
    }

    async fn unsubscribe(&self, demand: Demand) {
        let Some(container) = self.inventory.container_get(&demand.container_id).await else {
            debug!(
                container_id = %demand.container_id,
                kind = %demand.kind,
                "Unsubscribe for unknown container ignored"
            );
            return;
        };

        if self
            .registry
            .detach(container.key, demand.kind, demand.client.id())
            .await
        {
            debug!(
                container_id = %demand.container_id,
                kind = %demand.kind,
                client_id = %demand.client.id(),
                "Receiver left"
            );
        }
    }

    async fn client_leave(&self, client: &Client) {
        let removed = self.registry.leave(client.id()).await;
        debug!(client_id = %client.id(), resources = removed, "Client left");
    }

    async fn relay(&self, frame: ResponseFrame) {
        let Some(resource) = self.resource(&frame.cid, frame.kind).await else {
            debug!(container_id = %frame.cid, kind = %frame.kind, "Relay without live resource dropped");
            return;
        };

        resource.fan_out(&Arc::new(frame)).await;
    }

    /// Live Resource for a container id and kind.
    async fn resource(&self, cid: &ContainerId, kind: ResourceKind) -> Option<Arc<Resource>> {
        let container = self.inventory.container_get(cid).await?;
        self.registry.find(container.key, kind).await
    }
}
