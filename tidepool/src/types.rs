//! Identity types shared by every layer of the router.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Application-chosen key addressing one socket across the whole fleet.
///
/// Typically derived from a device or tenant identity. At any instant a key
/// is held by at most one node; the last `store` for a key wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketKey(String);

impl SocketKey {
    /// Create a key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SocketKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&SocketKey> for SocketKey {
    fn from(key: &SocketKey) -> Self {
        key.clone()
    }
}

impl AsRef<str> for SocketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SocketKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Transport-assigned identifier of one physical connection.
///
/// Unique per transport instance, never reused. Two handles registered under
/// the same [`SocketKey`] over time always carry different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw transport id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Metadata attached to a connection at registration time (identity fields
/// and the like).
pub type Metadata = serde_json::Map<String, serde_json::Value>;
