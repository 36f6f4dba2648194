//! Per-connection delivery handle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use dockmon_core::ResponseFrame;

/// Hub-assigned identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outcome of pushing one frame to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full; this frame was dropped for this client only.
    Dropped,
    /// Consumer is gone; the client should be pruned.
    Closed,
}

/// A receiver of frames.
///
/// Many resources push into the same bounded queue; exactly one writer
/// drains it. Equality is by [`ClientId`], never by queue contents.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    outbox: mpsc::Sender<Arc<ResponseFrame>>,
}

impl Client {
    /// Creates a client and the receiving end of its queue.
    pub fn new(id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<Arc<ResponseFrame>>) {
        let (outbox, inbox) = mpsc::channel(capacity.max(1));
        (Self { id, outbox }, inbox)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Pushes a frame without waiting.
    pub fn deliver(&self, frame: &Arc<ResponseFrame>) -> Delivery {
        match self.outbox.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Client {}
