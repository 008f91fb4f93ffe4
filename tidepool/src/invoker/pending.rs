//! Pending remote invocations awaiting their single reply.
//!
//! # Lifecycle
//!
//! ```text
//!   invoke()
//!     1. register(correlation_id) -> oneshot::Receiver
//!     2. publish request
//!     3. await receiver (bounded by the invocation timeout)
//!
//!   reply arrives            timeout elapses         link goes down
//!     resolve(id, marker)      discard(id)             fail_all(error)
//!     first reply wins         late replies dropped    every caller errs
//! ```
//!
//! An entry completes at most once: later replies for the same id are
//! unmatched and dropped.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::wire::{RemoteRequest, ReplyMarker};
use crate::error::RouterError;

/// Outcome delivered to the waiting caller.
pub type InvocationResult = Result<(), RouterError>;

/// One invocation waiting for the owning node's reply.
pub struct PendingInvocation {
    request: RemoteRequest,
    sender: Cell<Option<oneshot::Sender<InvocationResult>>>,
    start_time: Instant,
    completed: Cell<bool>,
}

impl PendingInvocation {
    fn new(request: RemoteRequest, sender: oneshot::Sender<InvocationResult>) -> Self {
        Self {
            request,
            sender: Cell::new(Some(sender)),
            start_time: Instant::now(),
            completed: Cell::new(false),
        }
    }

    /// The request this entry waits on.
    pub fn request(&self) -> &RemoteRequest {
        &self.request
    }

    /// Time since the request was registered.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the caller was already answered.
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    /// Hand `result` to the caller. Idempotent.
    pub fn complete(&self, result: InvocationResult) {
        if self.completed.replace(true) {
            return;
        }
        if let Some(sender) = self.sender.take() {
            if sender.send(result).is_err() {
                tracing::debug!(key = %self.request.key, "caller gone before completion");
            }
        }
    }
}

impl fmt::Debug for PendingInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("request", &self.request)
            .field("completed", &self.completed.get())
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

/// Pending invocations keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingInvocations {
    entries: RefCell<HashMap<String, PendingInvocation>>,
}

impl PendingInvocations {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request` under `correlation_id`; the receiver yields its outcome.
    pub fn register(
        &self,
        correlation_id: String,
        request: RemoteRequest,
    ) -> oneshot::Receiver<InvocationResult> {
        let (tx, rx) = oneshot::channel();
        self.entries
            .borrow_mut()
            .insert(correlation_id, PendingInvocation::new(request, tx));
        rx
    }

    /// Complete the entry for `correlation_id` from a reply marker.
    ///
    /// Returns `false` for unknown ids (duplicate or late replies).
    pub fn resolve(&self, correlation_id: &str, marker: ReplyMarker) -> bool {
        let Some(entry) = self.entries.borrow_mut().remove(correlation_id) else {
            tracing::debug!(correlation_id, "discarding unmatched reply");
            return false;
        };
        tracing::debug!(
            correlation_id,
            key = %entry.request.key,
            ?marker,
            elapsed = ?entry.elapsed(),
            "invocation resolved"
        );
        let result = match marker {
            ReplyMarker::Success => Ok(()),
            ReplyMarker::Failure => Err(RouterError::RemoteFailure {
                key: entry.request.key.clone(),
            }),
        };
        entry.complete(result);
        true
    }

    /// Forget `correlation_id` without answering (caller timed out).
    pub fn discard(&self, correlation_id: &str) -> Option<PendingInvocation> {
        self.entries.borrow_mut().remove(correlation_id)
    }

    /// Fail every pending invocation with an error built by `error`.
    pub fn fail_all(&self, error: impl Fn() -> RouterError) -> usize {
        let drained: Vec<_> = self.entries.borrow_mut().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.complete(Err(error()));
        }
        count
    }

    /// Number of invocations in flight.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
