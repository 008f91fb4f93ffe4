//! Connection transport contract.
//!
//! The transport terminates client connections (WebSocket or similar) and
//! is the only component that touches the network on the client side. The
//! router drives it through [`Transport`] and consumes its
//! [`TransportEvent`]s from an unbounded channel.

mod memory;

pub use memory::InMemoryTransport;

use std::fmt;

use async_trait::async_trait;

use crate::connection::ConnectionHandle;
use crate::types::ConnectionId;

/// Errors from transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is already closed.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// Writing to the connection failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Everything the transport reports about its connections.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A client connected. The handle is not registered yet.
    Connected(ConnectionHandle),

    /// A client sent a message.
    Message {
        /// Originating connection.
        connection: ConnectionHandle,
        /// Raw message bytes.
        payload: Vec<u8>,
    },

    /// The connection closed cleanly.
    Closed(ConnectionHandle),

    /// The connection was torn down without a close handshake.
    Terminated(ConnectionHandle),

    /// The connection failed and is gone.
    Error {
        /// Failed connection.
        connection: ConnectionHandle,
        /// What went wrong.
        error: TransportError,
    },

    /// The peer answered a ping.
    Pong(ConnectionHandle),
}

/// Operations the router needs from the connection transport.
#[async_trait(?Send)]
pub trait Transport: fmt::Debug {
    /// Write `payload` to the connection.
    async fn send(&self, connection: &ConnectionHandle, payload: &[u8])
        -> Result<(), TransportError>;

    /// Close the connection. A [`TransportEvent::Closed`] follows.
    fn close(&self, connection: &ConnectionHandle);

    /// Send a heartbeat ping. A [`TransportEvent::Pong`] follows if the
    /// peer is alive.
    fn ping(&self, connection: &ConnectionHandle);
}
