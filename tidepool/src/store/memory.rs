//! In-memory store for tests and single-process fleets.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;

use super::{Store, StoreError};

/// `HashMap`-backed [`Store`].
///
/// Share one instance (`Rc<InMemoryStore>`) between every node of a
/// simulated fleet. [`set_available`](Self::set_available) injects outages:
/// while unavailable, writes are dropped and reads fail.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: RefCell<HashMap<String, String>>,
    available: Cell<bool>,
}

impl InMemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            available: Cell::new(true),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Raw value under `key`, bypassing availability.
    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Store for InMemoryStore {
    fn set(&self, key: &str, value: &str) {
        if !self.available.get() {
            tracing::warn!(key, "store unavailable, dropping write");
            return;
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if !self.available.get() {
            return Err(StoreError::Unavailable);
        }
        Ok(self.entries.borrow().get(key).cloned())
    }
}
