//! Integration tests for the Unix socket server.
//!
//! These run a DaemonServer in front of a real hub and check the wire
//! protocol end to end: handshake, requests, subscriptions and cleanup.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#[macro_use]
mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use common::{container, CountingEngine, RecordingInventory, ScriptedStreamer, WAIT};
use dockmon_core::ResourceKind;
use dockmon_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};
use dockmond::controller::HostState;
use dockmond::hub::{spawn_hub, HubConfig, HubHandle};
use dockmond::server::{DaemonServer, IDLE_TIMEOUT};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    socket_path: PathBuf,
    hub: HubHandle,
    streamer: Arc<ScriptedStreamer>,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("dockmon.sock");

        let inventory = RecordingInventory::new(vec![
            container(1, "c1", "web"),
            container(2, "c2", "db"),
        ]);
        let streamer = ScriptedStreamer::new();
        let cancel_token = CancellationToken::new();

        let host = HostState::new();
        host.refresh(CountingEngine::new().as_ref()).await;

        let hub = spawn_hub(
            inventory.clone(),
            streamer.clone(),
            HubConfig::default(),
            cancel_token.clone(),
        );
        let server = DaemonServer::new(
            socket_path.clone(),
            hub.clone(),
            inventory,
            host,
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            hub,
            streamer,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake.
    async fn connect_ready(&self) -> TestClient {
        let mut client = self.connect().await;
        client.send(ClientMessage::connect(None)).await;
        match client.recv().await {
            DaemonMessage::Connected { .. } => client,
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    async fn receiver_count(&self, id: &str, kind: ResourceKind) -> usize {
        self.hub
            .resources()
            .await
            .iter()
            .find(|r| r.container.as_str() == id && r.kind == kind)
            .map_or(0, |r| r.receivers.len())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("recv timeout")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Returns true once the server has closed the connection.
    async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(WAIT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_assigns_connection_label() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    client.send(ClientMessage::connect(None)).await;
    match client.recv().await {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert!(client_id.starts_with("conn-"));
        }
        other => panic!("expected Connected, got {other:?}"),
    }

    let mut named = server.connect().await;
    named
        .send(ClientMessage::connect(Some("dashboard".to_string())))
        .await;
    match named.recv().await {
        DaemonMessage::Connected { client_id, .. } => assert_eq!(client_id, "dashboard"),
        other => panic!("expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let mut msg = ClientMessage::connect(None);
    msg.protocol_version = ProtocolVersion::new(2, 0);
    client.send(msg).await;

    assert!(matches!(client.recv().await, DaemonMessage::Rejected { .. }));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_request_before_connect_closes_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::ping(1)).await;

    assert!(matches!(client.recv().await, DaemonMessage::Error { .. }));
    assert!(client.is_closed().await);
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::ping(42)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 42 }));
}

#[tokio::test]
async fn test_malformed_line_answered_and_connection_kept() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send_raw("{not json").await;
    assert!(matches!(client.recv().await, DaemonMessage::Error { .. }));

    client.send(ClientMessage::ping(7)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 7 }));
}

#[tokio::test]
async fn test_list_containers() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::list_containers()).await;
    match client.recv().await {
        DaemonMessage::ContainerList { containers } => {
            let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, ["web", "db"]);
        }
        other => panic!("expected ContainerList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_container_with_image() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::get_container("c2")).await;
    match client.recv().await {
        DaemonMessage::Container { container, image } => {
            assert_eq!(container.name, "db");
            let image = image.expect("image tracked");
            assert_eq!(Some(&image.id), container.image_id.as_ref());
            assert_eq!(image.label(), "db:latest");
        }
        other => panic!("expected Container, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_unknown_container_is_not_found() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::get_container("nope")).await;
    match client.recv().await {
        DaemonMessage::Error { message, code } => {
            assert!(message.contains("nope"));
            assert_eq!(code.as_deref(), Some("not_found"));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    // the connection stays usable
    client.send(ClientMessage::ping(2)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 2 }));
}

#[tokio::test]
async fn test_list_images() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::list_images()).await;
    match client.recv().await {
        DaemonMessage::ImageList { images } => {
            let labels: Vec<&str> = images.iter().map(|i| i.label()).collect();
            assert_eq!(labels, ["web:latest", "db:latest"]);
        }
        other => panic!("expected ImageList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_summary() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::get_summary()).await;
    match client.recv().await {
        DaemonMessage::Summary { summary, volumes } => {
            assert_eq!(summary.os, "linux");
            assert_eq!(volumes.len(), 1);
            assert_eq!(volumes[0].name, "pgdata");
        }
        other => panic!("expected Summary, got {other:?}"),
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_subscribe_streams_frames() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "metrics")).await;
    eventually!(
        "stream open",
        server.streamer.is_open("c1", ResourceKind::Metrics)
    );

    server
        .streamer
        .feed("c1", ResourceKind::Metrics, json!({"cpu_percent": 3.5}))
        .await;

    match client.recv().await {
        DaemonMessage::Frame { frame } => {
            assert_eq!(frame.cid.as_str(), "c1");
            assert_eq!(frame.kind, ResourceKind::Metrics);
            assert_eq!(frame.content, json!({"cpu_percent": 3.5}));
        }
        other => panic!("expected Frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_two_connections_share_one_stream() {
    let server = TestServer::spawn().await;
    let mut first = server.connect_ready().await;
    let mut second = server.connect_ready().await;

    first.send(ClientMessage::subscribe("c2", "logs")).await;
    second.send(ClientMessage::subscribe("c2", "logs")).await;
    eventually!(
        "both subscribed",
        server.receiver_count("c2", ResourceKind::Logs).await == 2
    );
    eventually!("stream open", server.streamer.is_open("c2", ResourceKind::Logs));

    server
        .streamer
        .feed("c2", ResourceKind::Logs, json!("ready to accept connections"))
        .await;

    for client in [&mut first, &mut second] {
        match client.recv().await {
            DaemonMessage::Frame { frame } => {
                assert_eq!(frame.content, json!("ready to accept connections"));
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }
    assert_eq!(server.streamer.opens(), 1);
}

#[tokio::test]
async fn test_unknown_kind_and_container_get_no_reply() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "cpu")).await;
    client.send(ClientMessage::subscribe("missing", "metrics")).await;
    client.send(ClientMessage::unsubscribe("c1", "disk")).await;
    client.send(ClientMessage::ping(1)).await;

    // the pong is the first reply
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 1 }));
    sleep(Duration::from_millis(50)).await;
    assert!(server.hub.resources().await.is_empty());
    assert_eq!(server.streamer.opens(), 0);
}

#[tokio::test]
async fn test_unsubscribe_detaches_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "logs")).await;
    eventually!(
        "subscribed",
        server.receiver_count("c1", ResourceKind::Logs).await == 1
    );

    client.send(ClientMessage::unsubscribe("c1", "logs")).await;
    eventually!(
        "unsubscribed",
        server.receiver_count("c1", ResourceKind::Logs).await == 0
    );
}

#[tokio::test]
async fn test_disconnect_leaves_all_resources() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "metrics")).await;
    client.send(ClientMessage::subscribe("c2", "logs")).await;
    eventually!(
        "subscribed",
        server.receiver_count("c1", ResourceKind::Metrics).await == 1
            && server.receiver_count("c2", ResourceKind::Logs).await == 1
    );

    client.send(ClientMessage::disconnect()).await;
    assert!(client.is_closed().await);

    eventually!(
        "left",
        server.receiver_count("c1", ResourceKind::Metrics).await == 0
            && server.receiver_count("c2", ResourceKind::Logs).await == 0
    );
}

#[tokio::test]
async fn test_dropped_connection_leaves() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "metrics")).await;
    eventually!(
        "subscribed",
        server.receiver_count("c1", ResourceKind::Metrics).await == 1
    );

    drop(client);
    eventually!(
        "left",
        server.receiver_count("c1", ResourceKind::Metrics).await == 0
    );
}

// ============================================================================
// Idle Connections
// ============================================================================

/// Jumps the clock past the idle timeout, then lets time run again.
async fn outlast_idle_timeout() {
    // let the connection task arm its read timer first
    sleep(Duration::from_millis(20)).await;
    tokio::time::pause();
    tokio::time::advance(IDLE_TIMEOUT + Duration::from_secs(60)).await;
    tokio::time::resume();
}

#[tokio::test]
async fn test_idle_subscriber_kept_open() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "metrics")).await;
    eventually!(
        "subscribed",
        server.receiver_count("c1", ResourceKind::Metrics).await == 1
    );

    outlast_idle_timeout().await;

    assert_eq!(server.receiver_count("c1", ResourceKind::Metrics).await, 1);
    eventually!("stream open", server.streamer.is_open("c1", ResourceKind::Metrics));
    server
        .streamer
        .feed("c1", ResourceKind::Metrics, json!({"cpu": 3.0}))
        .await;
    assert!(matches!(client.recv().await, DaemonMessage::Frame { .. }));

    client.send(ClientMessage::ping(9)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 9 }));
}

#[tokio::test]
async fn test_idle_connection_without_subscriptions_closed() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "logs")).await;
    client.send(ClientMessage::unsubscribe("c1", "logs")).await;
    client.send(ClientMessage::ping(1)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 1 }));

    outlast_idle_timeout().await;

    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_partial_line_survives_idle_timeout() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::subscribe("c1", "metrics")).await;
    eventually!(
        "subscribed",
        server.receiver_count("c1", ResourceKind::Metrics).await == 1
    );

    let ping = serde_json::to_string(&ClientMessage::ping(5)).unwrap();
    let (head, tail) = ping.split_at(ping.len() / 2);
    client.writer.write_all(head.as_bytes()).await.unwrap();
    client.writer.flush().await.unwrap();

    outlast_idle_timeout().await;

    client.send_raw(tail).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 5 }));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    server.cancel_token.cancel();

    eventually!("socket removed", !server.socket_path.exists());
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_stale_socket_file_replaced() {
    let temp_dir = tempfile::tempdir().unwrap();
    let socket_path = temp_dir.path().join("stale.sock");
    std::fs::write(&socket_path, b"").unwrap();

    let inventory = RecordingInventory::new(Vec::new());
    let cancel_token = CancellationToken::new();
    let hub = spawn_hub(
        inventory.clone(),
        ScriptedStreamer::new(),
        HubConfig::default(),
        cancel_token.clone(),
    );
    let server = DaemonServer::new(
        socket_path.clone(),
        hub,
        inventory,
        HostState::new(),
        cancel_token.clone(),
    );
    let task = tokio::spawn(async move { server.run().await });

    let mut connected = None;
    for _ in 0..50 {
        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            connected = Some(stream);
            break;
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    assert!(connected.is_some(), "server did not replace the stale socket");

    cancel_token.cancel();
    assert!(task.await.unwrap().is_ok());
}
