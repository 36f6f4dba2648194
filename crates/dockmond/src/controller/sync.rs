//! Engine event synchronizer.
//!
//! Maps container lifecycle notifications onto inventory mutations:
//!
//! | status  | inventory call |
//! |---------|----------------|
//! | start   | `add`          |
//! | stop    | `stop`         |
//! | destroy | `remove`       |
//!
//! Any other container status is logged and ignored. Notifications of other
//! categories are discarded before anything else happens. Mutation failures
//! are logged and never retried; the next event for the same container
//! brings the inventory back in line.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dockmon_core::{EngineEvent, LifecycleAction};

use super::HostState;
use crate::engine::EngineInfo;
use crate::inventory::Inventory;

pub struct Synchronizer {
    inventory: Arc<dyn Inventory>,
    engine: Arc<dyn EngineInfo>,
    host: HostState,
}

impl Synchronizer {
    pub fn new(inventory: Arc<dyn Inventory>, engine: Arc<dyn EngineInfo>, host: HostState) -> Self {
        Self {
            inventory,
            engine,
            host,
        }
    }

    /// Consumes `events` until the feed closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<EngineEvent>, cancel: CancellationToken) {
        info!("Event synchronizer running");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.handle(event).await,
                None => {
                    warn!("Engine event feed closed");
                    break;
                }
            }
        }

        debug!("Event synchronizer stopped");
    }

    /// Applies one engine notification.
    pub async fn handle(&self, event: EngineEvent) {
        if !event.is_container() {
            return;
        }

        match LifecycleAction::from_status(&event.status) {
            Some(action) => {
                let result = match action {
                    LifecycleAction::Add => self.inventory.add(&event.id).await,
                    LifecycleAction::Stop => self.inventory.stop(&event.id).await,
                    LifecycleAction::Remove => self.inventory.remove(&event.id).await,
                };

                match result {
                    Ok(()) => info!(
                        container_id = %event.id,
                        status = %event.status,
                        action = %action,
                        "Container event applied"
                    ),
                    Err(e) => error!(
                        container_id = %event.id,
                        status = %event.status,
                        action = %action,
                        error = %e,
                        "Container event failed"
                    ),
                }
            }
            None => warn!(
                container_id = %event.id,
                status = %event.status,
                "Container event not handled"
            ),
        }

        self.host.refresh(self.engine.as_ref()).await;
    }
}
