//! Unix socket server for the dockmon daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐ subscribe/unsubscribe/leave ┌─────────────┐
//! │ConnectionHandler│────────────────────────────▶│  HubHandle  │
//! │   (per client)  │                             └──────┬──────┘
//! └───────▲─────────┘                                    │
//!         │ frames            ┌──────────────┐           │
//!         └───────────────────│ frame writer │◀──────────┘
//!                             └──────────────┘   client queue
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SharedWriter, IDLE_TIMEOUT};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controller::HostState;
use crate::hub::HubHandle;
use crate::inventory::Inventory;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/dockmon.sock";

pub struct DaemonServer {
    socket_path: PathBuf,
    hub: HubHandle,
    inventory: Arc<dyn Inventory>,
    host: HostState,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        hub: HubHandle,
        inventory: Arc<dyn Inventory>,
        host: HostState,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            hub,
            inventory,
            host,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Listens for connections until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_err)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(setup_err)?;

        info!(socket = %self.socket_path.display(), "Daemon server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.hub.clone(),
            Arc::clone(&self.inventory),
            self.host.clone(),
            self.cancel_token.child_token(),
            connection_number,
        );

        tokio::spawn(handler.run());
    }

    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
