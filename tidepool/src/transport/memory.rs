//! In-memory transport: scripted clients for tests and demos.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportEvent};
use crate::connection::{Connection, ConnectionHandle};
use crate::types::ConnectionId;

#[derive(Debug, Default)]
struct ClientState {
    closed: HashSet<ConnectionId>,
    unresponsive: HashSet<ConnectionId>,
    failing: HashSet<ConnectionId>,
    sent: Vec<(ConnectionId, Vec<u8>)>,
    close_calls: Vec<ConnectionId>,
    pings: HashMap<ConnectionId, u32>,
}

/// [`Transport`] whose clients are driven by the test.
///
/// Clients answer pings automatically unless made unresponsive with
/// [`set_responsive`](Self::set_responsive). Everything the router does to
/// a client (sends, closes, pings) is recorded for assertions.
#[derive(Debug)]
pub struct InMemoryTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    next_id: Cell<u64>,
    state: RefCell<ClientState>,
}

impl InMemoryTransport {
    /// Create a transport and the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            next_id: Cell::new(0),
            state: RefCell::new(ClientState::default()),
        };
        (transport, receiver)
    }

    /// Accept a new client connection.
    pub fn open(&self) -> ConnectionHandle {
        let id = ConnectionId::new(self.next_id.get() + 1);
        self.next_id.set(id.value());
        let handle = Connection::handle(id);
        self.emit(TransportEvent::Connected(Rc::clone(&handle)));
        handle
    }

    /// Simulate the client sending `payload`.
    pub fn deliver(&self, connection: &ConnectionHandle, payload: impl Into<Vec<u8>>) {
        self.emit(TransportEvent::Message {
            connection: Rc::clone(connection),
            payload: payload.into(),
        });
    }

    /// Whether the client answers pings.
    pub fn set_responsive(&self, connection: &ConnectionHandle, responsive: bool) {
        let mut state = self.state.borrow_mut();
        if responsive {
            state.unresponsive.remove(&connection.id());
        } else {
            state.unresponsive.insert(connection.id());
        }
    }

    /// Make every later send to the client fail.
    pub fn fail_sends(&self, connection: &ConnectionHandle) {
        self.state.borrow_mut().failing.insert(connection.id());
    }

    /// Simulate the client closing the connection.
    pub fn disconnect(&self, connection: &ConnectionHandle) {
        self.state.borrow_mut().closed.insert(connection.id());
        self.emit(TransportEvent::Closed(Rc::clone(connection)));
    }

    /// Simulate an abrupt teardown.
    pub fn terminate(&self, connection: &ConnectionHandle) {
        self.state.borrow_mut().closed.insert(connection.id());
        self.emit(TransportEvent::Terminated(Rc::clone(connection)));
    }

    /// Simulate a connection failure.
    pub fn error(&self, connection: &ConnectionHandle, error: TransportError) {
        self.state.borrow_mut().closed.insert(connection.id());
        self.emit(TransportEvent::Error {
            connection: Rc::clone(connection),
            error,
        });
    }

    /// Payloads successfully written, in order.
    pub fn sent(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }

    /// Payloads successfully written to one connection.
    pub fn sent_to(&self, connection: &ConnectionHandle) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .sent
            .iter()
            .filter(|(id, _)| *id == connection.id())
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of `close` calls made for a connection.
    pub fn close_calls(&self, connection: &ConnectionHandle) -> usize {
        self.state
            .borrow()
            .close_calls
            .iter()
            .filter(|id| **id == connection.id())
            .count()
    }

    /// Total number of `close` calls.
    pub fn total_close_calls(&self) -> usize {
        self.state.borrow().close_calls.len()
    }

    /// Number of pings sent to a connection.
    pub fn ping_count(&self, connection: &ConnectionHandle) -> u32 {
        self.state
            .borrow()
            .pings
            .get(&connection.id())
            .copied()
            .unwrap_or(0)
    }

    /// Whether the connection was closed by either side.
    pub fn is_closed(&self, connection: &ConnectionHandle) -> bool {
        self.state.borrow().closed.contains(&connection.id())
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("transport event dropped, router gone");
        }
    }
}

#[async_trait(?Send)]
impl Transport for InMemoryTransport {
    async fn send(
        &self,
        connection: &ConnectionHandle,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let id = connection.id();
        let mut state = self.state.borrow_mut();
        if state.closed.contains(&id) {
            return Err(TransportError::Closed(id));
        }
        if state.failing.contains(&id) {
            return Err(TransportError::SendFailed(format!("{id} refused the write")));
        }
        state.sent.push((id, payload.to_vec()));
        Ok(())
    }

    fn close(&self, connection: &ConnectionHandle) {
        let id = connection.id();
        let newly_closed = {
            let mut state = self.state.borrow_mut();
            state.close_calls.push(id);
            state.closed.insert(id)
        };
        if newly_closed {
            self.emit(TransportEvent::Closed(Rc::clone(connection)));
        }
    }

    fn ping(&self, connection: &ConnectionHandle) {
        let id = connection.id();
        let answers = {
            let mut state = self.state.borrow_mut();
            *state.pings.entry(id).or_default() += 1;
            !state.closed.contains(&id) && !state.unresponsive.contains(&id)
        };
        if answers {
            self.emit(TransportEvent::Pong(Rc::clone(connection)));
        }
    }
}
