//! Controller: startup of the inventory, the sink and the event feed, plus
//! the two long-running tasks that keep them connected.
//!
//! ```text
//! ┌─────────────┐ EngineEvent ┌──────────────┐ add/stop/remove ┌───────────┐
//! │ EventSource │────────────▶│ Synchronizer │────────────────▶│ Inventory │
//! └─────────────┘             └──────┬───────┘                 └─────┬─────┘
//!                                    │ refresh                       │ broadcast
//!                                    ▼                               ▼
//!                             ┌────────────┐                  ┌──────────────┐
//!                             │ HostState  │                  │ PersistRelay │──▶ sink
//!                             └────────────┘                  └──────────────┘
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dockmon_core::{HostSummary, VolumeSummary};

use crate::engine::{EngineError, EngineInfo, EventSource};
use crate::inventory::{Inventory, InventoryError};
use crate::sink::{PersistenceSink, SinkError};

mod persist;
mod sync;

pub use persist::PersistRelay;
pub use sync::Synchronizer;

/// Default bound on concurrent sink writes.
pub const DEFAULT_MAX_IN_FLIGHT_WRITES: usize = 4;

/// Startup failures. Each one aborts the daemon.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("inventory init failed: {0}")]
    Inventory(#[from] InventoryError),

    #[error("persistence sink init failed: {0}")]
    Sink(#[from] SinkError),

    #[error("engine event feed unavailable: {0}")]
    Events(#[from] EngineError),
}

// ============================================================================
// Host State
// ============================================================================

/// Latest host summary and volume list, shared with the socket server.
#[derive(Clone, Default)]
pub struct HostState {
    summary: Arc<RwLock<HostSummary>>,
    volumes: Arc<RwLock<Vec<VolumeSummary>>>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-reads both aggregates. A failed read keeps the previous value.
    pub async fn refresh(&self, engine: &dyn EngineInfo) {
        match engine.host_summary().await {
            Ok(summary) => *self.summary.write().await = summary,
            Err(e) => warn!(error = %e, "Host summary refresh failed"),
        }

        match engine.volumes().await {
            Ok(volumes) => *self.volumes.write().await = volumes,
            Err(e) => warn!(error = %e, "Volume refresh failed"),
        }
    }

    pub async fn summary(&self) -> HostSummary {
        self.summary.read().await.clone()
    }

    pub async fn volumes(&self) -> Vec<VolumeSummary> {
        self.volumes.read().await.clone()
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Handles of the tasks started by [`Controller::init`].
#[derive(Debug)]
pub struct ControllerTasks {
    pub sync: JoinHandle<()>,
    pub persist: JoinHandle<()>,
}

impl ControllerTasks {
    /// Waits for both tasks to finish.
    pub async fn join(self) {
        if let Err(e) = self.sync.await {
            warn!(error = %e, "Synchronizer task failed");
        }
        if let Err(e) = self.persist.await {
            warn!(error = %e, "Persistence relay task failed");
        }
    }
}

pub struct Controller {
    inventory: Arc<dyn Inventory>,
    events: Arc<dyn EventSource>,
    engine: Arc<dyn EngineInfo>,
    sink: Arc<dyn PersistenceSink>,
    host: HostState,
    max_in_flight_writes: usize,
}

impl Controller {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        events: Arc<dyn EventSource>,
        engine: Arc<dyn EngineInfo>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            inventory,
            events,
            engine,
            sink,
            host: HostState::new(),
            max_in_flight_writes: DEFAULT_MAX_IN_FLIGHT_WRITES,
        }
    }

    pub fn with_max_in_flight_writes(mut self, max: usize) -> Self {
        self.max_in_flight_writes = max;
        self
    }

    pub fn host(&self) -> HostState {
        self.host.clone()
    }

    pub fn inventory(&self) -> Arc<dyn Inventory> {
        Arc::clone(&self.inventory)
    }

    /// Brings up the sink, the inventory and the event feed, then starts the
    /// synchronizer and the persistence relay.
    ///
    /// The change channel is subscribed before the inventory loads so the
    /// initial batch reaches the sink.
    pub async fn init(&self, cancel: CancellationToken) -> Result<ControllerTasks, ControllerError> {
        self.host.refresh(self.engine.as_ref()).await;

        self.sink.init().await?;

        let batches = self.inventory.broadcast();
        self.inventory.init().await?;

        let events = self.events.events().await?;

        let synchronizer = Synchronizer::new(
            Arc::clone(&self.inventory),
            Arc::clone(&self.engine),
            self.host.clone(),
        );
        let relay = PersistRelay::new(Arc::clone(&self.sink), self.max_in_flight_writes);

        let tasks = ControllerTasks {
            sync: tokio::spawn(synchronizer.run(events, cancel.clone())),
            persist: tokio::spawn(relay.run(batches, cancel)),
        };

        info!(max_in_flight_writes = self.max_in_flight_writes, "Controller started");
        Ok(tasks)
    }
}
