//! Trait fakes shared by the dockmond integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use dockmon_core::{
    ContainerId, ContainerKey, ContainerState, EngineEvent, HostSummary, ImageId, InventoryItem,
    ResourceKind, Sample, TrackedContainer, TrackedImage, VolumeSummary,
};
use dockmond::engine::{
    ContainerDetails, EngineError, EngineInfo, EventSource, Streamer, STREAM_BUFFER,
};
use dockmond::inventory::{Inventory, InventoryError};
use dockmond::sink::{PersistenceSink, SinkError};

/// Upper bound for any wait on asynchronous hub or controller work.
pub const WAIT: Duration = Duration::from_secs(2);

/// Polls `$cond` until it holds, panicking after [`WAIT`].
macro_rules! eventually {
    ($what:expr, $cond:expr) => {{
        let polled = tokio::time::timeout($crate::common::WAIT, async {
            while !$cond {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "timed out waiting for: {}", $what);
    }};
}

pub fn container(key: u64, id: &str, name: &str) -> TrackedContainer {
    TrackedContainer {
        key: ContainerKey::new(key),
        id: ContainerId::new(id),
        name: name.to_string(),
        image: format!("{name}:latest"),
        image_id: Some(ImageId::new(format!("sha256:{name}"))),
        state: ContainerState::Running,
    }
}

pub fn image(id: &str, tag: &str) -> TrackedImage {
    TrackedImage {
        id: ImageId::new(id),
        tags: vec![tag.to_string()],
        size: 5_000_000,
        created: None,
    }
}

// ============================================================================
// Streamer
// ============================================================================

/// Streamer whose streams are fed by hand.
#[derive(Default)]
pub struct ScriptedStreamer {
    feeds: Mutex<HashMap<(ContainerId, ResourceKind), mpsc::Sender<Sample>>>,
    cancels: Mutex<HashMap<(ContainerId, ResourceKind), CancellationToken>>,
    opens: AtomicUsize,
    failing: Mutex<Vec<ContainerId>>,
}

impl ScriptedStreamer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later `open` for `id` fail.
    pub fn fail_opens_for(&self, id: &str) {
        self.failing.lock().unwrap().push(ContainerId::new(id));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, id: &str, kind: ResourceKind) -> bool {
        self.feeds
            .lock()
            .unwrap()
            .get(&(ContainerId::new(id), kind))
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Pushes a sample into the currently open stream.
    pub async fn feed(&self, id: &str, kind: ResourceKind, value: serde_json::Value) {
        let tx = self
            .feeds
            .lock()
            .unwrap()
            .get(&(ContainerId::new(id), kind))
            .cloned()
            .expect("stream not open");
        tx.send(Sample::new(value)).await.expect("stream receiver gone");
    }

    /// Pushes a sample if the consumer of the latest stream is still there.
    pub async fn try_feed(&self, id: &str, kind: ResourceKind, value: serde_json::Value) -> bool {
        let tx = self
            .feeds
            .lock()
            .unwrap()
            .get(&(ContainerId::new(id), kind))
            .cloned();
        match tx {
            Some(tx) => tx.send(Sample::new(value)).await.is_ok(),
            None => false,
        }
    }

    /// True once the hub cancelled the latest stream for `(id, kind)`.
    pub fn is_cancelled(&self, id: &str, kind: ResourceKind) -> bool {
        self.cancels
            .lock()
            .unwrap()
            .get(&(ContainerId::new(id), kind))
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Ends the stream as if the engine closed it.
    pub fn close(&self, id: &str, kind: ResourceKind) {
        self.feeds
            .lock()
            .unwrap()
            .remove(&(ContainerId::new(id), kind));
    }
}

#[async_trait]
impl Streamer for ScriptedStreamer {
    async fn open(
        &self,
        container: &TrackedContainer,
        kind: ResourceKind,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Sample>, EngineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.cancels
            .lock()
            .unwrap()
            .insert((container.id.clone(), kind), cancel);
        if self.failing.lock().unwrap().contains(&container.id) {
            return Err(EngineError::NotFound(container.id.clone()));
        }
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.feeds
            .lock()
            .unwrap()
            .insert((container.id.clone(), kind), tx);
        Ok(rx)
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub add: Vec<ContainerId>,
    pub stop: Vec<ContainerId>,
    pub remove: Vec<ContainerId>,
}

/// Inventory over a fixed container table that records lifecycle calls.
///
/// Each container's image is tracked as `<name>:latest`.
pub struct RecordingInventory {
    containers: Vec<TrackedContainer>,
    images: Vec<TrackedImage>,
    calls: Mutex<Calls>,
    fail_init: bool,
    changes: broadcast::Sender<Vec<InventoryItem>>,
}

impl RecordingInventory {
    pub fn new(containers: Vec<TrackedContainer>) -> Arc<Self> {
        Arc::new(Self::build(containers, false))
    }

    pub fn failing_init() -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), true))
    }

    fn build(containers: Vec<TrackedContainer>, fail_init: bool) -> Self {
        let (changes, _) = broadcast::channel(16);
        let images = containers
            .iter()
            .filter_map(|c| Some(image(c.image_id.as_ref()?.as_str(), &c.image)))
            .collect();
        Self {
            containers,
            images,
            calls: Mutex::new(Calls::default()),
            fail_init,
            changes,
        }
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    /// Publishes a change batch as a real inventory would after a mutation.
    pub fn publish(&self, items: Vec<InventoryItem>) {
        let _ = self.changes.send(items);
    }

    fn known(&self, id: &ContainerId) -> Result<(), InventoryError> {
        if self.containers.iter().any(|c| &c.id == id) {
            Ok(())
        } else {
            Err(InventoryError::NotFound(id.clone()))
        }
    }
}

#[async_trait]
impl Inventory for RecordingInventory {
    async fn init(&self) -> Result<(), InventoryError> {
        if self.fail_init {
            return Err(EngineError::Connection("engine unreachable".to_string()).into());
        }
        Ok(())
    }

    async fn container_get(&self, id: &ContainerId) -> Option<TrackedContainer> {
        self.containers.iter().find(|c| &c.id == id).cloned()
    }

    async fn containers(&self) -> Vec<TrackedContainer> {
        self.containers.clone()
    }

    async fn add(&self, id: &ContainerId) -> Result<(), InventoryError> {
        self.calls.lock().unwrap().add.push(id.clone());
        self.known(id)
    }

    async fn stop(&self, id: &ContainerId) -> Result<(), InventoryError> {
        self.calls.lock().unwrap().stop.push(id.clone());
        self.known(id)
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), InventoryError> {
        self.calls.lock().unwrap().remove.push(id.clone());
        self.known(id)
    }

    fn broadcast(&self) -> broadcast::Receiver<Vec<InventoryItem>> {
        self.changes.subscribe()
    }

    async fn image_get(&self, id: &ImageId) -> Option<TrackedImage> {
        self.images.iter().find(|i| &i.id == id).cloned()
    }

    async fn images(&self) -> Vec<TrackedImage> {
        self.images.clone()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Event feed handing out one pre-built receiver.
pub struct ScriptedEvents {
    feed: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl ScriptedEvents {
    pub fn new() -> (Arc<Self>, mpsc::Sender<EngineEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let events = Arc::new(Self {
            feed: Mutex::new(Some(rx)),
        });
        (events, tx)
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            feed: Mutex::new(None),
        })
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        self.feed
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| EngineError::Connection("event feed unavailable".to_string()))
    }
}

/// Host info source counting summary refreshes. Runs no containers.
#[derive(Default)]
pub struct CountingEngine {
    refreshes: AtomicUsize,
    images: Vec<TrackedImage>,
    images_fail: bool,
}

impl CountingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_images(images: Vec<TrackedImage>) -> Arc<Self> {
        Arc::new(Self {
            images,
            ..Self::default()
        })
    }

    pub fn failing_images() -> Arc<Self> {
        Arc::new(Self {
            images_fail: true,
            ..Self::default()
        })
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineInfo for CountingEngine {
    async fn host_summary(&self) -> Result<HostSummary, EngineError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HostSummary {
            version: "27.1.1".to_string(),
            api_version: "1.46".to_string(),
            os: "linux".to_string(),
            image_n: 3,
            container_n: i64::try_from(n).unwrap_or(i64::MAX),
        })
    }

    async fn volumes(&self) -> Result<Vec<VolumeSummary>, EngineError> {
        Ok(vec![VolumeSummary {
            name: "pgdata".to_string(),
            mountpoint: "/var/lib/docker/volumes/pgdata/_data".to_string(),
            driver: "local".to_string(),
            created: "2024-05-01T10:00:00Z".to_string(),
            used_by: 1,
            size: 4096,
        }])
    }

    async fn list_running(&self) -> Result<Vec<ContainerDetails>, EngineError> {
        Ok(Vec::new())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, EngineError> {
        Err(EngineError::NotFound(id.clone()))
    }

    async fn list_images(&self) -> Result<Vec<TrackedImage>, EngineError> {
        if self.images_fail {
            return Err(EngineError::Connection("engine unreachable".to_string()));
        }
        Ok(self.images.clone())
    }

    async fn inspect_image(&self, id: &ImageId) -> Result<TrackedImage, EngineError> {
        self.images
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or_else(|| EngineError::ImageNotFound(id.clone()))
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Sink whose writes block until the test releases them.
pub struct GatedSink {
    gate: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    written: Mutex<Vec<Vec<InventoryItem>>>,
    fail_init: bool,
}

impl GatedSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    pub fn failing_init() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(fail_init: bool) -> Self {
        Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            fail_init,
        }
    }

    /// Lets `n` blocked or future writes complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Vec<InventoryItem>> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for GatedSink {
    async fn init(&self) -> Result<(), SinkError> {
        if self.fail_init {
            return Err(SinkError::NotInitialized);
        }
        Ok(())
    }

    async fn bulk_write(&self, items: Vec<InventoryItem>) -> Result<(), SinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();

        self.written.lock().unwrap().push(items);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
