//! Docker engine adapter built on `bollard`.
//!
//! Every live stream runs in its own task that forwards engine items into a
//! bounded channel and stops as soon as its cancellation token fires or the
//! consumer drops the receiver.

use async_trait::async_trait;
use bollard::query_parameters::{
    EventsOptions, InspectContainerOptions, ListContainersOptions, ListImagesOptions,
    ListVolumesOptions, LogsOptions, StatsOptions,
};
use bollard::secret::{EventMessage, EventMessageTypeEnum, ImageInspect, ImageSummary};
use chrono::{DateTime, Utc};
use bollard::Docker;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dockmon_core::{
    ContainerId, EngineEvent, EventCategory, HostSummary, ImageId, ResourceKind, Sample,
    TrackedContainer, TrackedImage, VolumeSummary,
};

use super::metrics::MetricsSample;
use super::{ContainerDetails, EngineError, EngineInfo, EventSource, Streamer, STREAM_BUFFER};

/// Number of trailing log lines replayed when a log stream opens.
const LOG_TAIL: &str = "100";

/// Docker engine client.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects using the local defaults (`DOCKER_HOST` or the default socket)
    /// and verifies the engine answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        Ok(Self { docker })
    }
}

fn to_err(e: bollard::errors::Error, id: Option<&ContainerId>) -> EngineError {
    match id {
        Some(id) if is_not_found(&e) => EngineError::NotFound(id.clone()),
        _ => EngineError::Request(e.to_string()),
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn image_from_summary(summary: ImageSummary) -> TrackedImage {
    TrackedImage {
        id: ImageId::new(summary.id),
        tags: summary
            .repo_tags
            .into_iter()
            .filter(|t| t != "<none>:<none>")
            .collect(),
        size: summary.size,
        created: DateTime::from_timestamp(summary.created, 0),
    }
}

fn image_from_inspect(info: ImageInspect, id: &ImageId) -> TrackedImage {
    TrackedImage {
        id: info.id.map(ImageId::new).unwrap_or_else(|| id.clone()),
        tags: info.repo_tags.unwrap_or_default(),
        size: info.size.unwrap_or_default(),
        created: info
            .created
            .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
            .map(|c| c.with_timezone(&Utc)),
    }
}

/// Forwards items of an engine stream until it ends, fails, the consumer
/// goes away, or `cancel` fires.
async fn pump<S, T, F>(
    stream: S,
    tx: mpsc::Sender<Sample>,
    cancel: CancellationToken,
    label: &str,
    mut map: F,
) where
    S: Stream<Item = Result<T, bollard::errors::Error>>,
    F: FnMut(T) -> Option<Sample>,
{
    let mut stream = Box::pin(stream);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(stream = label, "Engine stream cancelled");
                break;
            }

            item = stream.next() => match item {
                Some(Ok(item)) => {
                    let Some(sample) = map(item) else { continue };
                    if tx.send(sample).await.is_err() {
                        debug!(stream = label, "Engine stream consumer gone");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(stream = label, error = %e, "Engine stream failed");
                    break;
                }
                None => {
                    debug!(stream = label, "Engine stream ended");
                    break;
                }
            }
        }
    }
}

fn event_category(typ: Option<EventMessageTypeEnum>) -> EventCategory {
    match typ {
        Some(EventMessageTypeEnum::CONTAINER) => EventCategory::Container,
        Some(EventMessageTypeEnum::IMAGE) => EventCategory::Image,
        Some(EventMessageTypeEnum::VOLUME) => EventCategory::Volume,
        Some(EventMessageTypeEnum::NETWORK) => EventCategory::Network,
        Some(other) => EventCategory::from_engine(&other.to_string()),
        None => EventCategory::Other(String::new()),
    }
}

fn engine_event(message: EventMessage) -> Option<EngineEvent> {
    let id = message.actor.as_ref()?.id.clone()?;
    Some(EngineEvent {
        category: event_category(message.typ),
        status: message.action.unwrap_or_default(),
        id: ContainerId::new(id),
    })
}

#[async_trait]
impl EventSource for DockerEngine {
    async fn events(&self) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let mut stream = Box::pin(docker.events(Some(EventsOptions {
                ..Default::default()
            })));

            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => {
                        let Some(event) = engine_event(message) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Engine event stream failed");
                        break;
                    }
                }
            }

            debug!("Engine event stream closed");
        });

        Ok(rx)
    }
}

#[async_trait]
impl Streamer for DockerEngine {
    async fn open(
        &self,
        container: &TrackedContainer,
        kind: ResourceKind,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Sample>, EngineError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let docker = self.docker.clone();
        let id = container.id.clone();

        match kind {
            ResourceKind::Metrics => {
                tokio::spawn(async move {
                    let options = StatsOptions {
                        stream: true,
                        one_shot: false,
                    };
                    let stream = docker.stats(id.as_str(), Some(options));
                    pump(stream, tx, cancel, "metrics", |stats| {
                        let doc = serde_json::to_value(&stats).ok()?;
                        MetricsSample::from_stats(&doc)
                            .map(MetricsSample::into_sample)
                            .ok()
                    })
                    .await;
                });
            }
            ResourceKind::Logs => {
                tokio::spawn(async move {
                    let options = LogsOptions {
                        follow: true,
                        stdout: true,
                        stderr: true,
                        tail: LOG_TAIL.to_string(),
                        ..Default::default()
                    };
                    let stream = docker.logs(id.as_str(), Some(options));
                    pump(stream, tx, cancel, "logs", |output| {
                        let line = output.to_string();
                        Some(Sample::log_line(line.trim_end_matches(['\r', '\n'])))
                    })
                    .await;
                });
            }
        }

        Ok(rx)
    }
}

#[async_trait]
impl EngineInfo for DockerEngine {
    async fn host_summary(&self) -> Result<HostSummary, EngineError> {
        let version = self.docker.version().await.map_err(|e| to_err(e, None))?;
        let info = self.docker.info().await.map_err(|e| to_err(e, None))?;

        Ok(HostSummary {
            version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            os: version.os.unwrap_or_default(),
            image_n: info.images.unwrap_or_default(),
            container_n: info.containers.unwrap_or_default(),
        })
    }

    async fn volumes(&self) -> Result<Vec<VolumeSummary>, EngineError> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions>)
            .await
            .map_err(|e| to_err(e, None))?;

        let volumes = response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| {
                // usage data is only filled in by `docker system df`
                let (used_by, size) = v.usage_data.map_or(
                    (VolumeSummary::UNKNOWN_USAGE, VolumeSummary::UNKNOWN_USAGE),
                    |u| (u.ref_count, u.size),
                );
                VolumeSummary {
                    name: v.name,
                    mountpoint: v.mountpoint,
                    driver: v.driver,
                    created: v.created_at.unwrap_or_default(),
                    used_by,
                    size,
                }
            })
            .collect();

        Ok(volumes)
    }

    async fn list_running(&self) -> Result<Vec<ContainerDetails>, EngineError> {
        let options = ListContainersOptions {
            all: false,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| to_err(e, None))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map_or_else(|| id.clone(), |n| n.trim_start_matches('/').to_string());
                Some(ContainerDetails {
                    id: ContainerId::new(id),
                    name,
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.map(ImageId::new),
                    running: true,
                })
            })
            .collect())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails, EngineError> {
        let info = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| to_err(e, Some(id)))?;

        let name = info
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.short().to_string());

        Ok(ContainerDetails {
            id: info.id.map(ContainerId::new).unwrap_or_else(|| id.clone()),
            name,
            image: info.config.and_then(|c| c.image).unwrap_or_default(),
            image_id: info.image.map(ImageId::new),
            running: info.state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn list_images(&self) -> Result<Vec<TrackedImage>, EngineError> {
        let options = ListImagesOptions {
            all: false,
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| to_err(e, None))?;

        Ok(images.into_iter().map(image_from_summary).collect())
    }

    async fn inspect_image(&self, id: &ImageId) -> Result<TrackedImage, EngineError> {
        let info = self
            .docker
            .inspect_image(id.as_str())
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    EngineError::ImageNotFound(id.clone())
                } else {
                    to_err(e, None)
                }
            })?;

        Ok(image_from_inspect(info, id))
    }
}
