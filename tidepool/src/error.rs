//! Error types for the tidepool router.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::store::StoreError;
use crate::types::SocketKey;

/// Errors surfaced by [`Router`](crate::Router) operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No node answered before the invocation timeout.
    ///
    /// Either no node holds the key, or its owner is too slow to answer.
    #[error("Socket {key} unreachable: no reply within {timeout:?}")]
    Unreachable {
        /// Target key.
        key: SocketKey,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The broker link is down after exhausting reconnect attempts.
    #[error("Broker link down after {attempts} reconnect attempts")]
    BrokerLinkDown {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Strict existence read failed.
    #[error("Existence store read failed: {0}")]
    StoreRead(#[from] StoreError),

    /// The owning node could not perform the operation on its connection.
    #[error("Remote operation on socket {key} failed on its owning node")]
    RemoteFailure {
        /// Target key.
        key: SocketKey,
    },

    /// The existence index reports that no node holds the key.
    #[error("Socket {key} is not connected anywhere in the fleet")]
    Absent {
        /// Target key.
        key: SocketKey,
    },

    /// A broker operation failed on a live link.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Request serialization failed.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The router configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

/// Errors while loading or validating a [`RouterConfig`](crate::RouterConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("{0}")]
    Invalid(String),
}
