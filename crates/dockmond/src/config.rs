//! Daemon configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, then environment variables (`DOCKMON_SOCKET`,
//! `DOCKMON_STORE`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::DEFAULT_MAX_IN_FLIGHT_WRITES;
use crate::hub::{HubConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CLIENT_QUEUE};
use crate::server::DEFAULT_SOCKET_PATH;

/// Environment variable overriding `socket_path`.
pub const ENV_SOCKET: &str = "DOCKMON_SOCKET";

/// Environment variable overriding `store_path`.
pub const ENV_STORE: &str = "DOCKMON_STORE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,

    /// JSON-lines file inventory changes are appended to.
    pub store_path: PathBuf,

    /// Frames buffered per connection before new ones are dropped.
    pub client_queue_capacity: usize,

    /// Capacity of the hub command channel.
    pub hub_channel_capacity: usize,

    /// Concurrent sink writes.
    pub max_in_flight_writes: usize,

    /// `tracing` filter directives; `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            store_path: default_store_path(),
            client_queue_capacity: DEFAULT_CLIENT_QUEUE,
            hub_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_in_flight_writes: DEFAULT_MAX_IN_FLIGHT_WRITES,
            log_filter: None,
        }
    }
}

/// `<state_dir>/dockmon/inventory.jsonl`, falling back to `/tmp` when the
/// platform has no state directory.
pub fn default_store_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dockmon")
        .join("inventory.jsonl")
}

impl DaemonConfig {
    /// Loads the file at `path` (or defaults when `None`), applies the
    /// process environment and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(socket) = non_empty(ENV_SOCKET) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(store) = non_empty(ENV_STORE) {
            self.store_path = PathBuf::from(store);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("client_queue_capacity", self.client_queue_capacity),
            ("hub_channel_capacity", self.hub_channel_capacity),
            ("max_in_flight_writes", self.max_in_flight_writes),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            channel_capacity: self.hub_channel_capacity,
            client_queue_capacity: self.client_queue_capacity,
        }
    }
}
