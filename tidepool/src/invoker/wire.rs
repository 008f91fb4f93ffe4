//! JSON request payload and reply markers exchanged between nodes.
//!
//! Request: `{"method": "send" | "close", "key": "...", "message": "..."}`,
//! `message` only for `send`. Reply: the bare marker string, correlated
//! through the broker's `correlation_id` property.

use serde::{Deserialize, Serialize};

use crate::constants::{REMOTE_FUNC_FAIL_RESPONSE, REMOTE_FUNC_SUCCESS_RESPONSE};
use crate::types::SocketKey;

/// Operation executed by the node that owns the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMethod {
    /// Write a message to the socket.
    Send,
    /// Close the socket.
    Close,
}

/// A request fanned out to every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRequest {
    /// Operation to run.
    pub method: RemoteMethod,
    /// Target socket.
    pub key: SocketKey,
    /// Payload for [`RemoteMethod::Send`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why an inbound request was ignored.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, or missing fields.
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A method this node does not implement.
    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    /// A `send` without a message.
    #[error("send request without message")]
    MissingMessage,
}

#[derive(Deserialize)]
struct RawRequest {
    method: String,
    key: SocketKey,
    #[serde(default)]
    message: Option<String>,
}

impl RemoteRequest {
    /// `send` request.
    pub fn send(key: SocketKey, message: impl Into<String>) -> Self {
        Self {
            method: RemoteMethod::Send,
            key,
            message: Some(message.into()),
        }
    }

    /// `close` request.
    pub fn close(key: SocketKey) -> Self {
        Self {
            method: RemoteMethod::Close,
            key,
            message: None,
        }
    }

    /// JSON body.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a JSON body, rejecting unknown methods.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawRequest = serde_json::from_slice(body)?;
        let method = match raw.method.as_str() {
            "send" => RemoteMethod::Send,
            "close" => RemoteMethod::Close,
            _ => return Err(DecodeError::UnknownMethod(raw.method)),
        };
        if method == RemoteMethod::Send && raw.message.is_none() {
            return Err(DecodeError::MissingMessage);
        }
        Ok(Self {
            method,
            key: raw.key,
            message: raw.message,
        })
    }
}

/// Outcome reported by the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMarker {
    /// The local operation succeeded.
    Success,
    /// The local operation failed.
    Failure,
}

impl ReplyMarker {
    /// Marker string on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => REMOTE_FUNC_SUCCESS_RESPONSE,
            Self::Failure => REMOTE_FUNC_FAIL_RESPONSE,
        }
    }

    /// Marker bytes on the wire.
    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Parse a reply body. Anything but the success marker is a failure.
    pub fn from_bytes(body: &[u8]) -> Self {
        if body == REMOTE_FUNC_SUCCESS_RESPONSE.as_bytes() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}
