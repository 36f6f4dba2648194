//! Persistence of inventory changes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use dockmon_core::InventoryItem;

/// Errors reported by a persistence sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to encode item: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink used before init")]
    NotInitialized,
}

/// Destination for batches of changed inventory items.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Prepares the sink. Failure aborts daemon startup.
    async fn init(&self) -> Result<(), SinkError>;

    /// Persists one batch.
    async fn bulk_write(&self, items: Vec<InventoryItem>) -> Result<(), SinkError>;
}

/// Appends items as JSON lines to a single file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn init(&self) -> Result<(), SinkError> {
        let open_err = |source| SinkError::Open {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(open_err)?;

        *self.file.lock().await = Some(file);
        info!(path = %self.path.display(), "Inventory store opened");
        Ok(())
    }

    async fn bulk_write(&self, items: Vec<InventoryItem>) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for item in &items {
            serde_json::to_writer(&mut buf, item)?;
            buf.push(b'\n');
        }

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(SinkError::NotInitialized)?;
        file.write_all(&buf).await?;
        file.flush().await?;

        debug!(items = items.len(), "Inventory batch written");
        Ok(())
    }
}
