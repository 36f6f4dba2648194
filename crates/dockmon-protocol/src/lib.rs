//! dockmon Protocol - Wire protocol for daemon communication
//!
//! This crate provides the newline-delimited JSON messages exchanged
//! between the daemon and its socket clients.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::ProtocolVersion;
