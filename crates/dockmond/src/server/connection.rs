//! Connection handler for individual client connections.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Owns one hub [`Client`] and a writer task draining its frame queue
//! - Routes subscribe/unsubscribe demands to the hub without replying
//! - Answers container, image, summary and ping requests
//! - Submits a leave for its client however the connection ends
//!
//! A connection that goes [`IDLE_TIMEOUT`] without a request is closed,
//! unless it holds subscriptions: a passive subscriber only reads frames.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dockmon_core::{ContainerId, ResourceKind, ResponseFrame};
use dockmon_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::controller::HostState;
use crate::hub::{Client, HubError, HubHandle};
use crate::inventory::Inventory;

/// Shared write half; the request loop and the frame writer both use it.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// How long a connection without subscriptions may stay silent (5 minutes)
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    /// Partial request line; survives a read cut short by the idle timer.
    line: Vec<u8>,
    writer: SharedWriter,
    hub: HubHandle,
    inventory: Arc<dyn Inventory>,
    host: HostState,
    cancel: CancellationToken,

    /// Label reported in `Connected` and in logs.
    label: String,

    /// Demands this connection holds, keyed by container id as sent.
    subscriptions: HashSet<(String, ResourceKind)>,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        hub: HubHandle,
        inventory: Arc<dyn Inventory>,
        host: HostState,
        cancel: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            hub,
            inventory,
            host,
            cancel,
            label: format!("conn-{connection_number}"),
            subscriptions: HashSet::new(),
            connection_number,
        }
    }

    /// Runs the connection until it closes.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return;
        }

        let (client, inbox) = self.hub.create_client();
        info!(
            client = %self.label,
            client_id = %client.id(),
            "Client handshake completed"
        );

        let writer_task = spawn_frame_writer(Arc::clone(&self.writer), inbox);

        if let Err(e) = self.process_messages(&client).await {
            debug!(client = %self.label, error = %e, "Connection closed");
        }

        if self.hub.leave(&client).await.is_err() {
            debug!(client = %self.label, "Hub gone before leave");
        }
        writer_task.abort();

        info!(client = %self.label, client_id = %client.id(), "Client disconnected");
    }

    /// Expects a `Connect` message, validates the protocol version and
    /// answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(IDLE_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                if let Some(id) = client_id {
                    self.label = id;
                }
                self.send_message(DaemonMessage::connected(self.label.clone()))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self, client: &Client) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                read = timeout(IDLE_TIMEOUT, self.read_message()) => read,
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client = %self.label, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // a malformed line is answered, not fatal
                    let _ = self.send_message(DaemonMessage::error(&e)).await;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if !self.subscriptions.is_empty() => {
                    debug!(
                        client = %self.label,
                        subscriptions = self.subscriptions.len(),
                        "Idle subscriber kept"
                    );
                    continue;
                }
                Err(_) => {
                    debug!(client = %self.label, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match self.handle_message(msg, client).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => {
                    error!(client = %self.label, error = %e, "Error handling message");
                    let _ = self
                        .send_message(DaemonMessage::error(&e.to_string()))
                        .await;
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        msg: ClientMessage,
        client: &Client,
    ) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::Subscribe {
                container_id,
                resource,
            } => {
                // unknown kinds get no reply, like unknown containers
                let Some(kind) = self.parse_kind(&resource) else {
                    return Ok(());
                };
                self.hub.subscribe(client, container_id.clone(), kind).await?;
                self.subscriptions.insert((container_id, kind));
            }

            MessageType::Unsubscribe {
                container_id,
                resource,
            } => {
                let Some(kind) = self.parse_kind(&resource) else {
                    return Ok(());
                };
                self.subscriptions.remove(&(container_id.clone(), kind));
                self.hub.unsubscribe(client, container_id, kind).await?;
            }

            MessageType::ListContainers => {
                let containers = self.inventory.containers().await;
                self.send_message(DaemonMessage::container_list(containers))
                    .await?;
            }

            MessageType::GetContainer { container_id } => {
                let id = ContainerId::from(container_id.as_str());
                let reply = match self.inventory.container_get(&id).await {
                    Some(container) => {
                        let image = match &container.image_id {
                            Some(id) => self.inventory.image_get(id).await,
                            None => None,
                        };
                        DaemonMessage::container(container, image)
                    }
                    None => DaemonMessage::error_with_code(
                        &format!("container not tracked: {container_id}"),
                        "not_found",
                    ),
                };
                self.send_message(reply).await?;
            }

            MessageType::ListImages => {
                let images = self.inventory.images().await;
                self.send_message(DaemonMessage::image_list(images)).await?;
            }

            MessageType::GetSummary => {
                let summary = self.host.summary().await;
                let volumes = self.host.volumes().await;
                self.send_message(DaemonMessage::summary(summary, volumes))
                    .await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client = %self.label, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    fn parse_kind(&self, resource: &str) -> Option<ResourceKind> {
        match resource.parse::<ResourceKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                debug!(client = %self.label, error = %e, "Demand for unknown resource dropped");
                None
            }
        }
    }

    /// Reads one request line.
    ///
    /// Cancel safe: bytes read before a timeout stay in `self.line` and the
    /// next call completes the same line.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 && self.line.is_empty() {
            return Err(ConnectionError::Eof);
        }

        let line = std::mem::take(&mut self.line);
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_slice(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }
}

/// Serializes `msg` as one line and flushes it within [`WRITE_TIMEOUT`].
async fn write_message(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Drains a client's frame queue onto the socket.
///
/// Stops on the first write failure; dropping the queue then lets every
/// Resource prune this client.
fn spawn_frame_writer(
    writer: SharedWriter,
    mut inbox: mpsc::Receiver<Arc<ResponseFrame>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            let msg = DaemonMessage::frame(ResponseFrame::clone(&frame));
            if let Err(e) = write_message(&writer, &msg).await {
                debug!(error = %e, "Frame write failed");
                break;
            }
        }
    })
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}
