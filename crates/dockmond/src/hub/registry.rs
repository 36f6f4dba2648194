//! Registry of live Resources, keyed by inventory container key.
//!
//! All structural changes happen under one write lock. Receivers are only
//! ever added while that lock is held, which makes [`Registry::reclaim`]
//! (check-empty-then-remove) atomic with respect to a concurrent subscribe.
//! Lock order is always registry first, then a Resource's receiver list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use dockmon_core::{ContainerKey, ResourceKind, TrackedContainer};

use super::client::{Client, ClientId};
use super::resource::{Resource, ResourceStatus};

/// Result of [`Registry::attach`].
#[derive(Debug)]
pub enum Attach {
    /// A new Resource was registered; its fan-out task must be started.
    Created(Arc<Resource>),
    /// The client joined an existing live Resource.
    Joined(Arc<Resource>),
    /// The client was already a receiver.
    AlreadyPresent(Arc<Resource>),
}

#[derive(Clone, Default)]
pub struct Registry {
    resources: Arc<RwLock<HashMap<ContainerKey, Vec<Arc<Resource>>>>>,
    next_instance: Arc<AtomicU64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live Resource for `(key, kind)`.
    pub async fn find(&self, key: ContainerKey, kind: ResourceKind) -> Option<Arc<Resource>> {
        self.resources
            .read()
            .await
            .get(&key)?
            .iter()
            .find(|r| r.kind() == kind && r.is_live())
            .cloned()
    }

    /// Adds `client` to the live Resource for `(container, kind)`, creating
    /// one if none exists. Quit Resources still awaiting eviction are
    /// replaced, never joined.
    pub async fn attach(
        &self,
        container: &TrackedContainer,
        kind: ResourceKind,
        client: Client,
    ) -> Attach {
        let mut resources = self.resources.write().await;
        let slot = resources.entry(container.key).or_default();
        slot.retain(|r| r.is_live());

        if let Some(existing) = slot.iter().find(|r| r.kind() == kind) {
            let existing = Arc::clone(existing);
            return if existing.add_receiver(client).await {
                Attach::Joined(existing)
            } else {
                Attach::AlreadyPresent(existing)
            };
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let resource = Arc::new(Resource::new(instance, container.clone(), kind, client));
        slot.push(Arc::clone(&resource));
        Attach::Created(resource)
    }

    /// Removes `client` from the live Resource for `(key, kind)`. Returns
    /// false if there is none or the client was not a receiver.
    pub async fn detach(&self, key: ContainerKey, kind: ResourceKind, client: ClientId) -> bool {
        match self.find(key, kind).await {
            Some(resource) => resource.remove_receiver(client).await,
            None => false,
        }
    }

    /// Removes `client` from every Resource. Returns how many lists it was
    /// removed from.
    pub async fn leave(&self, client: ClientId) -> usize {
        let resources = self.resources.read().await;
        let mut removed = 0;
        for resource in resources.values().flatten() {
            if resource.remove_receiver(client).await {
                removed += 1;
            }
        }
        removed
    }

    /// Removes `resource` if it still has no receivers.
    ///
    /// Returns false, leaving it registered, if a receiver joined since the
    /// caller observed zero.
    pub async fn reclaim(&self, resource: &Arc<Resource>) -> bool {
        let mut resources = self.resources.write().await;
        if resource.receiver_count().await > 0 {
            return false;
        }
        Self::unlink(&mut resources, resource)
    }

    /// Removes `resource` unconditionally.
    pub async fn evict(&self, resource: &Arc<Resource>) -> bool {
        let mut resources = self.resources.write().await;
        Self::unlink(&mut resources, resource)
    }

    fn unlink(
        resources: &mut HashMap<ContainerKey, Vec<Arc<Resource>>>,
        resource: &Arc<Resource>,
    ) -> bool {
        let key = resource.container().key;
        let Some(slot) = resources.get_mut(&key) else {
            return false;
        };

        let before = slot.len();
        slot.retain(|r| !Arc::ptr_eq(r, resource));
        let removed = slot.len() != before;
        if slot.is_empty() {
            resources.remove(&key);
        }

        if removed {
            debug!(
                container_id = %resource.container().id,
                kind = %resource.kind(),
                instance = resource.instance(),
                "Resource unregistered"
            );
        }
        removed
    }

    pub async fn snapshot(&self) -> Vec<ResourceStatus> {
        let resources = self.resources.read().await;
        let mut all = Vec::new();
        for resource in resources.values().flatten() {
            all.push(resource.status().await);
        }
        all.sort_by_key(|s| s.instance);
        all
    }

    /// Quits and removes every Resource.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.resources.write().await.drain().collect();
        let mut quit = 0;
        for resource in drained.into_iter().flat_map(|(_, slot)| slot) {
            resource.quit();
            quit += 1;
        }
        debug!(resources = quit, "Registry drained");
    }
}
