//! Image inventory.
//!
//! Loaded before the containers so a container can be linked to its image at
//! load time. Changes go out on the container store's broadcast channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use dockmon_core::{ImageId, InventoryItem, TrackedImage};

use crate::engine::{EngineError, EngineInfo};

pub struct ImageStore {
    engine: Arc<dyn EngineInfo>,
    entries: RwLock<HashMap<ImageId, TrackedImage>>,
    changes: broadcast::Sender<Vec<InventoryItem>>,
}

impl ImageStore {
    pub fn new(engine: Arc<dyn EngineInfo>, changes: broadcast::Sender<Vec<InventoryItem>>) -> Self {
        Self {
            engine,
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Loads the host's images and publishes them as one batch.
    pub async fn init(&self) -> Result<(), EngineError> {
        let images = self.engine.list_images().await?;
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        let mut batch = Vec::with_capacity(images.len());
        for image in images {
            batch.push(image.to_item(now));
            entries.insert(image.id.clone(), image);
        }
        drop(entries);

        info!(images = batch.len(), "Images loaded");
        if !batch.is_empty() {
            let _ = self.changes.send(batch);
        }
        Ok(())
    }

    pub async fn by_id(&self, id: &ImageId) -> Option<TrackedImage> {
        self.entries.read().await.get(id).cloned()
    }

    /// All tracked images, newest first.
    pub async fn images(&self) -> Vec<TrackedImage> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        all
    }

    /// Returns the image, inspecting and tracking it first if it is new.
    ///
    /// An image the engine no longer knows is reported as missing, not as an
    /// error; the container keeps its plain image reference.
    pub async fn ensure(&self, id: &ImageId) -> Result<Option<TrackedImage>, EngineError> {
        if let Some(image) = self.by_id(id).await {
            return Ok(Some(image));
        }

        let image = match self.engine.inspect_image(id).await {
            Ok(image) => image,
            Err(EngineError::ImageNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&image.id) {
            return Ok(Some(existing.clone()));
        }
        entries.insert(image.id.clone(), image.clone());
        drop(entries);

        debug!(image_id = %image.id.short(), tags = ?image.tags, "Image tracked");
        let _ = self.changes.send(vec![image.to_item(Utc::now())]);
        Ok(Some(image))
    }
}
