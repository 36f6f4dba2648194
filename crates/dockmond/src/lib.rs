//! dockmon Daemon - subscription hub and inventory synchronizer
//!
//! This crate provides the core infrastructure for the dockmon daemon:
//! - `hub` - shares one live metrics/log stream per container and kind
//!   between any number of clients
//! - `controller` - keeps the inventory in step with engine events and
//!   relays inventory changes to the persistence sink
//! - `inventory` - tracked containers, their identity and their images
//! - `engine` - Docker engine interfaces and their `bollard` implementation
//! - `sink` - persistence of inventory changes
//! - `server` - Unix socket server for client connections
//! - `config` - daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           dockmond                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌─────────────────┐  demands  ┌──────────────┐  open  ┌───────┐ │
//! │  │  DaemonServer   │──────────▶│     Hub      │───────▶│Engine │ │
//! │  │ (Unix Socket)   │◀──frames──│ (Resources)  │◀──────│       │ │
//! │  └────────┬────────┘           └──────┬───────┘samples └───┬───┘ │
//! │           │ lists                     │ lookup             │     │
//! │           ▼                           ▼                    │     │
//! │  ┌─────────────────┐  mutate   ┌──────────────┐  events    │     │
//! │  │   Controller    │──────────▶│  Inventory   │◀───────────┘     │
//! │  │ (synchronizer)  │           └──────┬───────┘                  │
//! │  └─────────────────┘                  │ batches                  │
//! │                                       ▼                          │
//! │                               ┌──────────────┐                   │
//! │                               │ PersistRelay │──▶ JsonlSink      │
//! │                               └──────────────┘                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod controller;
pub mod engine;
pub mod hub;
pub mod inventory;
pub mod server;
pub mod sink;
