//! Events surfaced to the application.

use crate::connection::ConnectionHandle;
use crate::transport::TransportError;

/// What happened on this node's sockets.
///
/// Close, terminate and error events are surfaced after the connection's
/// key was removed from the registry.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A client connected. Register it with
    /// [`Router::store_connection`](super::Router::store_connection) once
    /// its key is known.
    Connection(ConnectionHandle),

    /// A client sent a message.
    Message {
        /// Originating connection.
        connection: ConnectionHandle,
        /// Raw message bytes.
        payload: Vec<u8>,
    },

    /// A connection closed.
    Close(ConnectionHandle),

    /// A connection was torn down without a close handshake.
    Terminate(ConnectionHandle),

    /// A connection failed.
    SocketError {
        /// Failed connection.
        connection: ConnectionHandle,
        /// What went wrong.
        error: TransportError,
    },

    /// A tagged message broadcast by some node of the fleet.
    GlobalMessage {
        /// Tag the message matched.
        tag: String,
        /// The `message` field of the broadcast JSON object, when present.
        message: Option<serde_json::Value>,
        /// Raw message bytes as received by the originating node.
        payload: Vec<u8>,
    },
}

impl RouterEvent {
    /// The local connection this event is about, if any.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match self {
            Self::Connection(connection)
            | Self::Close(connection)
            | Self::Terminate(connection)
            | Self::Message { connection, .. }
            | Self::SocketError { connection, .. } => Some(connection),
            Self::GlobalMessage { .. } => None,
        }
    }
}
