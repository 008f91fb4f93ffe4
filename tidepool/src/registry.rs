//! Process-local connection registry: maps socket keys to owned handles.
//!
//! The registry is the node's only table of live sockets. It is explicitly
//! owned (shared via `Rc` with the router and the liveness monitor) and
//! knows nothing about the network. Every insert and removal is reported to
//! an optional [`RegistryObserver`] inside the same synchronous call, which
//! is how the existence index stays paired with the table.
//!
//! # Concurrency
//!
//! Single-threaded (`RefCell`): all mutations run on the node's local task
//! set, so no two mutations ever race.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::connection::ConnectionHandle;
use crate::types::{Metadata, SocketKey};

/// Notified after every registry mutation.
pub trait RegistryObserver: fmt::Debug {
    /// A key now maps to a (possibly new) handle.
    fn on_stored(&self, key: &SocketKey);

    /// A key no longer maps to any handle.
    fn on_removed(&self, key: &SocketKey);
}

/// Mapping from [`SocketKey`] to the connection this node owns for it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RefCell<HashMap<SocketKey, ConnectionHandle>>,
    observer: Option<Rc<dyn RegistryObserver>>,
}

impl ConnectionRegistry {
    /// Registry without an observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry reporting every mutation to `observer`.
    pub fn with_observer(observer: Rc<dyn RegistryObserver>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            observer: Some(observer),
        }
    }

    /// Register `handle` under `key`, merging `metadata` onto it.
    ///
    /// Overwrites any handle previously stored under the key and returns
    /// it. The previous connection is NOT closed; that is the caller's
    /// decision.
    pub fn store(
        &self,
        key: SocketKey,
        handle: ConnectionHandle,
        metadata: Metadata,
    ) -> Option<ConnectionHandle> {
        handle.merge_metadata(metadata);
        handle.assign_key(key.clone());
        let connection_id = handle.id();
        let previous = self.entries.borrow_mut().insert(key.clone(), handle);
        if let Some(observer) = &self.observer {
            observer.on_stored(&key);
        }
        tracing::debug!(%key, %connection_id, replaced = previous.is_some(), "socket stored");
        previous
    }

    /// Unregister `key`. No-op when absent.
    pub fn remove(&self, key: &SocketKey) -> Option<ConnectionHandle> {
        let removed = self.entries.borrow_mut().remove(key);
        if removed.is_some() {
            if let Some(observer) = &self.observer {
                observer.on_removed(key);
            }
            tracing::debug!(%key, "socket removed");
        }
        removed
    }

    /// Unregister the key `handle` was stored under, but only while the
    /// registry still maps that key to this very connection.
    ///
    /// Returns `true` when an entry was removed.
    pub fn remove_connection(&self, handle: &ConnectionHandle) -> bool {
        let Some(key) = handle.key() else {
            return false;
        };
        if !self.is_current(&key, handle) {
            return false;
        }
        self.remove(&key).is_some()
    }

    /// Whether `key` currently maps to `handle`.
    pub fn is_current(&self, key: &SocketKey, handle: &ConnectionHandle) -> bool {
        self.entries
            .borrow()
            .get(key)
            .is_some_and(|current| Rc::ptr_eq(current, handle))
    }

    /// The handle stored under `key`.
    pub fn get(&self, key: &SocketKey) -> Option<ConnectionHandle> {
        self.entries.borrow().get(key).cloned()
    }

    /// Whether `key` is registered on this node.
    pub fn contains(&self, key: &SocketKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Number of registered sockets.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no socket is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> KeySnapshot {
        let keys: Vec<SocketKey> = self.entries.borrow().keys().cloned().collect();
        KeySnapshot { keys: keys.into() }
    }

    /// Snapshot of the current `(key, handle)` pairs.
    pub fn snapshot(&self) -> Vec<(SocketKey, ConnectionHandle)> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, handle)| (key.clone(), Rc::clone(handle)))
            .collect()
    }
}

/// Point-in-time copy of the registry keys.
///
/// Cheap to clone, iterable any number of times; later registry mutations
/// are not reflected.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    keys: Rc<[SocketKey]>,
}

impl KeySnapshot {
    /// Iterate over the captured keys.
    pub fn iter(&self) -> std::slice::Iter<'_, SocketKey> {
        self.keys.iter()
    }

    /// Number of captured keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `key` was registered when the snapshot was taken.
    pub fn contains(&self, key: &SocketKey) -> bool {
        self.keys.contains(key)
    }
}

impl<'a> IntoIterator for &'a KeySnapshot {
    type Item = &'a SocketKey;
    type IntoIter = std::slice::Iter<'a, SocketKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
