//! Fleet-wide existence index: "is this key connected somewhere?"
//!
//! A thin layer over the shared [`Store`]. Every node records `EXISTS` when
//! its registry gains a key and `NOT_EXISTS` when it loses one, so any node
//! answers existence queries with a single store read instead of a
//! broadcast.
//!
//! The index never says *which* node owns a key. It is eventually
//! consistent and may stay stale after a node crash (no lease or TTL).

use std::rc::Rc;

use crate::constants::{EXISTS, NOT_EXISTS};
use crate::registry::RegistryObserver;
use crate::store::{Store, StoreError};
use crate::types::SocketKey;

/// Presence flags for socket keys in the shared store.
#[derive(Debug)]
pub struct ExistenceIndex {
    store: Rc<dyn Store>,
}

impl ExistenceIndex {
    /// Index backed by `store`.
    pub fn new(store: Rc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record that some node now holds `key`.
    pub fn mark_present(&self, key: &SocketKey) {
        self.store.set(key.as_str(), EXISTS);
    }

    /// Record that no node holds `key` any more.
    pub fn mark_absent(&self, key: &SocketKey) {
        self.store.set(key.as_str(), NOT_EXISTS);
    }

    /// Fail-open existence check: read errors count as "not found".
    ///
    /// Callers that must tell "absent" from "unknown" use
    /// [`lookup`](Self::lookup).
    pub async fn exists(&self, key: &SocketKey) -> bool {
        match self.lookup(key).await {
            Ok(exists) => exists,
            Err(error) => {
                tracing::warn!(%key, %error, "existence read failed, assuming absent");
                false
            }
        }
    }

    /// Strict existence check. A key never written reads as absent.
    pub async fn lookup(&self, key: &SocketKey) -> Result<bool, StoreError> {
        let value = self.store.get(key.as_str()).await?;
        Ok(value.as_deref() == Some(EXISTS))
    }
}

impl RegistryObserver for ExistenceIndex {
    fn on_stored(&self, key: &SocketKey) {
        self.mark_present(key);
    }

    fn on_removed(&self, key: &SocketKey) {
        self.mark_absent(key);
    }
}
