//! Shared key/value store contract backing the existence index.
//!
//! The store is shared by the whole fleet and used without any locking:
//! writes are fire-and-forget, reads may fail. Only the [`InMemoryStore`]
//! implementation ships with this crate; production deployments plug in a
//! networked store behind the same trait.

mod memory;

pub use memory::InMemoryStore;

use std::fmt;

use async_trait::async_trait;

/// Errors from store reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable")]
    Unavailable,

    /// The store answered with an error.
    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

/// Fleet-wide key/value store.
#[async_trait(?Send)]
pub trait Store: fmt::Debug {
    /// Write `value` under `key` without waiting for an acknowledgement.
    fn set(&self, key: &str, value: &str);

    /// Read the value under `key`; `Ok(None)` when the key was never set.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}
