//! Connection handles and their liveness state.
//!
//! A [`Connection`] is created by the transport when a client connects and
//! is owned by that node for its whole life. The router only ever passes
//! around [`ConnectionHandle`]s (`Rc<Connection>`), so the registry, the
//! liveness monitor and the transport all observe the same state.
//!
//! # Liveness
//!
//! ```text
//!   Healthy ──ping──▶ AwaitingPong ──pong──▶ Healthy
//!                          │
//!                 no pong within pong_delay
//!                          ▼
//!                      Unhealthy ──ping──▶ AwaitingPong
//! ```
//!
//! `pending_pings` counts pings sent since the last pong. A pong resets it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::types::{ConnectionId, Metadata, SocketKey};

/// Shared handle to a live connection.
pub type ConnectionHandle = Rc<Connection>;

/// Heartbeat state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Answered the last ping (or was never pinged).
    Healthy,
    /// Pinged, pong not observed yet.
    AwaitingPong,
    /// Missed the pong window of at least one sweep.
    Unhealthy,
}

/// One physical connection owned by this node.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    key: RefCell<Option<SocketKey>>,
    metadata: RefCell<Metadata>,
    liveness: Cell<Liveness>,
    pending_pings: Cell<u32>,
}

impl Connection {
    /// Create a fresh, healthy, unregistered connection.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            key: RefCell::new(None),
            metadata: RefCell::new(Metadata::new()),
            liveness: Cell::new(Liveness::Healthy),
            pending_pings: Cell::new(0),
        }
    }

    /// Create a fresh connection already wrapped in a handle.
    pub fn handle(id: ConnectionId) -> ConnectionHandle {
        Rc::new(Self::new(id))
    }

    /// Transport id of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Key this connection was last registered under, if any.
    pub fn key(&self) -> Option<SocketKey> {
        self.key.borrow().clone()
    }

    /// Copy of the metadata merged onto this connection.
    pub fn metadata(&self) -> Metadata {
        self.metadata.borrow().clone()
    }

    /// A single metadata field.
    pub fn metadata_value(&self, field: &str) -> Option<serde_json::Value> {
        self.metadata.borrow().get(field).cloned()
    }

    /// Current heartbeat state.
    pub fn liveness(&self) -> Liveness {
        self.liveness.get()
    }

    /// Whether the connection answered its last ping.
    pub fn is_healthy(&self) -> bool {
        self.liveness.get() == Liveness::Healthy
    }

    /// Pings sent since the last pong.
    pub fn pending_pings(&self) -> u32 {
        self.pending_pings.get()
    }

    pub(crate) fn assign_key(&self, key: SocketKey) {
        *self.key.borrow_mut() = Some(key);
    }

    pub(crate) fn merge_metadata(&self, metadata: Metadata) {
        self.metadata.borrow_mut().extend(metadata);
    }

    /// Record an outgoing ping; returns the new pending count.
    pub(crate) fn mark_ping_sent(&self) -> u32 {
        let pings = self.pending_pings.get().saturating_add(1);
        self.pending_pings.set(pings);
        self.liveness.set(Liveness::AwaitingPong);
        pings
    }

    pub(crate) fn mark_pong(&self) {
        self.pending_pings.set(0);
        self.liveness.set(Liveness::Healthy);
    }

    pub(crate) fn mark_unhealthy(&self) {
        if self.liveness.get() == Liveness::AwaitingPong {
            self.liveness.set(Liveness::Unhealthy);
        }
    }
}
