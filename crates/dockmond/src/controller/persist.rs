//! Relay from inventory change batches to the persistence sink.
//!
//! Each batch is written by its own task, but at most `max_in_flight`
//! writes run at once: the drain loop waits for a permit before taking the
//! next batch off the channel, so a slow sink backs up into the broadcast
//! buffer instead of spawning writers without bound.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use dockmon_core::InventoryItem;

use crate::sink::PersistenceSink;

pub struct PersistRelay {
    sink: Arc<dyn PersistenceSink>,
    permits: Arc<Semaphore>,
    max_in_flight: u32,
}

impl PersistRelay {
    pub fn new(sink: Arc<dyn PersistenceSink>, max_in_flight: usize) -> Self {
        let max_in_flight = u32::try_from(max_in_flight.max(1)).unwrap_or(u32::MAX);
        Self {
            sink,
            permits: Arc::new(Semaphore::new(max_in_flight as usize)),
            max_in_flight,
        }
    }

    /// Drains `batches` until the channel closes or `cancel` fires, then
    /// waits for the writes already started.
    pub async fn run(
        self,
        mut batches: broadcast::Receiver<Vec<InventoryItem>>,
        cancel: CancellationToken,
    ) {
        loop {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => batch,
            };

            match batch {
                Ok(items) if items.is_empty() => {}
                Ok(items) => {
                    let sink = Arc::clone(&self.sink);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let count = items.len();
                        if let Err(e) = sink.bulk_write(items).await {
                            error!(items = count, error = %e, "Bulk write failed");
                        }
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Persistence relay lagged, batches lost");
                }
                Err(RecvError::Closed) => {
                    debug!("Inventory change channel closed");
                    break;
                }
            }
        }

        // in-flight writes hold the remaining permits
        if self.permits.acquire_many(self.max_in_flight).await.is_ok() {
            debug!("Persistence relay drained");
        }
    }
}
