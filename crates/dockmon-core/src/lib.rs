//! dockmon Core - Shared types for Docker host monitoring
//!
//! This crate provides the core domain types shared between
//! the daemon (dockmond) and its socket clients.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod container;
pub mod error;
pub mod event;
pub mod image;
pub mod resource;
pub mod summary;

// Re-exports for convenience
pub use container::{
    ContainerId, ContainerItem, ContainerKey, ContainerState, InventoryItem, TrackedContainer,
};
pub use error::{DomainError, DomainResult};
pub use event::{EngineEvent, EventCategory, LifecycleAction};
pub use image::{ImageId, ImageItem, TrackedImage};
pub use resource::{ResourceKind, ResponseFrame, Sample};
pub use summary::{HostSummary, VolumeSummary};
