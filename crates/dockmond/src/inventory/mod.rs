//! Container and image inventory.
//!
//! The inventory is the source of truth for container identity: the hub keys
//! its registry by the `ContainerKey` handed out here, and the synchronizer
//! mutates it from engine lifecycle events. Images are loaded first and
//! containers link to them by `ImageId`. Every mutation of either is
//! published as a batch of `InventoryItem` on one broadcast channel that the
//! persistence relay drains.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Broadcast sends without receivers are ignored

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use dockmon_core::{
    ContainerId, ContainerKey, ContainerState, ImageId, InventoryItem, TrackedContainer,
    TrackedImage,
};

use crate::engine::{ContainerDetails, EngineError, EngineInfo};

mod images;

pub use images::ImageStore;

/// Capacity of the change broadcast channel.
pub const CHANGE_BUFFER: usize = 64;

/// Errors returned by inventory mutations.
#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("container not tracked: {0}")]
    NotFound(ContainerId),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Container inventory consumed by the hub and the synchronizer.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Loads the initial set of containers.
    async fn init(&self) -> Result<(), InventoryError>;

    /// Looks up a tracked container by engine id.
    async fn container_get(&self, id: &ContainerId) -> Option<TrackedContainer>;

    /// All tracked containers, ordered by key.
    async fn containers(&self) -> Vec<TrackedContainer>;

    /// Starts tracking `id` as running.
    async fn add(&self, id: &ContainerId) -> Result<(), InventoryError>;

    /// Marks `id` as stopped.
    async fn stop(&self, id: &ContainerId) -> Result<(), InventoryError>;

    /// Stops tracking `id`.
    async fn remove(&self, id: &ContainerId) -> Result<(), InventoryError>;

    /// Subscribes to batches of changed items.
    fn broadcast(&self) -> broadcast::Receiver<Vec<InventoryItem>>;

    /// Looks up a tracked image.
    async fn image_get(&self, _id: &ImageId) -> Option<TrackedImage> {
        None
    }

    /// All tracked images.
    async fn images(&self) -> Vec<TrackedImage> {
        Vec::new()
    }
}

// ============================================================================
// Container Store
// ============================================================================

/// Engine-backed inventory.
///
/// A container keeps its `ContainerKey` across stop and restart. Once
/// removed, a later `add` of the same id gets a fresh key.
pub struct ContainerStore {
    engine: Arc<dyn EngineInfo>,
    images: ImageStore,
    entries: RwLock<HashMap<ContainerId, TrackedContainer>>,
    next_key: AtomicU64,
    changes: broadcast::Sender<Vec<InventoryItem>>,
}

impl ContainerStore {
    /// Creates an empty store. Call [`Inventory::init`] to load images and
    /// containers.
    pub fn new(engine: Arc<dyn EngineInfo>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            images: ImageStore::new(Arc::clone(&engine), changes.clone()),
            engine,
            entries: RwLock::new(HashMap::new()),
            next_key: AtomicU64::new(1),
            changes,
        }
    }

    /// Makes sure the container's image is tracked. Failures only cost the
    /// image entry, never the container.
    async fn link_image(&self, details: &ContainerDetails) {
        let Some(image_id) = &details.image_id else {
            return;
        };
        match self.images.ensure(image_id).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!(container_id = %details.id, image_id = %image_id.short(), "Image gone"),
            Err(e) => warn!(container_id = %details.id, error = %e, "Image lookup failed"),
        }
    }

    fn next_key(&self) -> ContainerKey {
        ContainerKey::new(self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    fn publish(&self, items: Vec<InventoryItem>) {
        if items.is_empty() {
            return;
        }
        // no receivers is fine
        let _ = self.changes.send(items);
    }

    fn track(&self, details: ContainerDetails) -> TrackedContainer {
        TrackedContainer {
            key: self.next_key(),
            id: details.id,
            name: details.name,
            image: details.image,
            image_id: details.image_id,
            state: if details.running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            },
        }
    }
}

#[async_trait]
impl Inventory for ContainerStore {
    async fn init(&self) -> Result<(), InventoryError> {
        self.images.init().await?;

        let running = self.engine.list_running().await?;
        for details in &running {
            self.link_image(details).await;
        }
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        let mut batch = Vec::with_capacity(running.len());
        for details in running {
            let container = self.track(details);
            batch.push(container.to_item(now));
            entries.insert(container.id.clone(), container);
        }
        drop(entries);

        info!(containers = batch.len(), "Inventory loaded");
        self.publish(batch);
        Ok(())
    }

    async fn container_get(&self, id: &ContainerId) -> Option<TrackedContainer> {
        let entries = self.entries.read().await;
        if let Some(container) = entries.get(id) {
            return Some(container.clone());
        }

        // accept a unique id prefix, as the docker CLI does
        let mut matches = entries
            .values()
            .filter(|c| c.id.as_str().starts_with(id.as_str()));
        match (matches.next(), matches.next()) {
            (Some(container), None) if !id.as_str().is_empty() => Some(container.clone()),
            _ => None,
        }
    }

    async fn containers(&self) -> Vec<TrackedContainer> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|c| c.key);
        all
    }

    async fn add(&self, id: &ContainerId) -> Result<(), InventoryError> {
        let details = self.engine.inspect(id).await.map_err(|e| match e {
            EngineError::NotFound(id) => InventoryError::NotFound(id),
            other => InventoryError::Engine(other),
        })?;
        self.link_image(&details).await;

        let mut entries = self.entries.write().await;
        let container = match entries.get_mut(&details.id) {
            Some(existing) => {
                existing.name = details.name;
                existing.image = details.image;
                existing.image_id = details.image_id;
                existing.state = ContainerState::Running;
                existing.clone()
            }
            None => {
                let mut container = self.track(details);
                container.state = ContainerState::Running;
                entries.insert(container.id.clone(), container.clone());
                container
            }
        };
        drop(entries);

        debug!(container_id = %container.id, key = %container.key, "Container tracked");
        self.publish(vec![container.to_item(Utc::now())]);
        Ok(())
    }

    async fn stop(&self, id: &ContainerId) -> Result<(), InventoryError> {
        let mut entries = self.entries.write().await;
        let container = entries
            .get_mut(id)
            .ok_or_else(|| InventoryError::NotFound(id.clone()))?;
        container.state = ContainerState::Stopped;
        let item = container.to_item(Utc::now());
        drop(entries);

        self.publish(vec![item]);
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), InventoryError> {
        let mut container = self
            .entries
            .write()
            .await
            .remove(id)
            .ok_or_else(|| InventoryError::NotFound(id.clone()))?;
        container.state = ContainerState::Removed;

        debug!(container_id = %container.id, key = %container.key, "Container untracked");
        self.publish(vec![container.to_item(Utc::now())]);
        Ok(())
    }

    fn broadcast(&self) -> broadcast::Receiver<Vec<InventoryItem>> {
        self.changes.subscribe()
    }

    async fn image_get(&self, id: &ImageId) -> Option<TrackedImage> {
        self.images.by_id(id).await
    }

    async fn images(&self) -> Vec<TrackedImage> {
        self.images.images().await
    }
}
