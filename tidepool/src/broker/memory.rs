//! In-memory broker for tests and single-process fleets.
//!
//! A [`BrokerHub`] plays the broker server; every node holds its own
//! [`InMemoryBroker`] connection to the shared hub.
//!
//! ```text
//!   node A ── InMemoryBroker ─┐
//!   node B ── InMemoryBroker ─┼──▶ Rc<BrokerHub>  (exchanges, queues)
//!   node C ── InMemoryBroker ─┘
//! ```
//!
//! [`BrokerHub::fail`] simulates a broker outage: every queue disappears,
//! every connection is invalidated and reconnects are refused until
//! [`BrokerHub::restore`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Broker, BrokerError, Delivery, MessageProperties, ReplyQueue, Subscription};

#[derive(Debug)]
struct QueueEntry {
    sender: mpsc::UnboundedSender<Delivery>,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct HubState {
    available: bool,
    epoch: u64,
    next_delivery_tag: u64,
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueEntry>,
    acked: usize,
    published: HashMap<String, usize>,
}

impl HubState {
    fn next_tag(&mut self) -> u64 {
        self.next_delivery_tag += 1;
        self.next_delivery_tag
    }

    /// Auto-delete queues that expired or lost their consumer.
    fn prune_queues(&mut self) {
        let now = Instant::now();
        let before = self.queues.len();
        self.queues.retain(|_, entry| {
            !entry.sender.is_closed() && !entry.expires_at.is_some_and(|deadline| now >= deadline)
        });
        let pruned = before - self.queues.len();
        if pruned > 0 {
            tracing::trace!(pruned, "deleted expired queues");
        }
    }
}

/// Shared broker "server" for a simulated fleet.
#[derive(Debug)]
pub struct BrokerHub {
    state: RefCell<HubState>,
}

impl BrokerHub {
    /// Create an available hub with no queues.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HubState {
                available: true,
                epoch: 0,
                next_delivery_tag: 0,
                bindings: HashMap::new(),
                queues: HashMap::new(),
                acked: 0,
                published: HashMap::new(),
            }),
        }
    }

    /// Drop every queue and connection and refuse new connections.
    pub fn fail(&self) {
        let mut state = self.state.borrow_mut();
        state.available = false;
        state.epoch += 1;
        state.bindings.clear();
        state.queues.clear();
        tracing::info!(epoch = state.epoch, "in-memory broker failed");
    }

    /// Accept connections again. Existing connections stay invalid.
    pub fn restore(&self) {
        self.state.borrow_mut().available = true;
        tracing::info!("in-memory broker restored");
    }

    /// Whether connections are accepted.
    pub fn is_available(&self) -> bool {
        self.state.borrow().available
    }

    /// Number of live queues (subscriptions and reply queues).
    pub fn queue_count(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.prune_queues();
        state.queues.len()
    }

    /// Number of acknowledged deliveries.
    pub fn acked_count(&self) -> usize {
        self.state.borrow().acked
    }

    /// Number of messages published to `exchange`.
    pub fn published_count(&self, exchange: &str) -> usize {
        self.state
            .borrow()
            .published
            .get(exchange)
            .copied()
            .unwrap_or(0)
    }

    fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    fn declare_queue(
        &self,
        expires_at: Option<Instant>,
    ) -> (String, mpsc::UnboundedReceiver<Delivery>) {
        let name = format!("amq.gen-{}", Uuid::new_v4());
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.borrow_mut();
        state.prune_queues();
        state
            .queues
            .insert(name.clone(), QueueEntry { sender, expires_at });
        (name, receiver)
    }

    fn bind(&self, exchange: &str, queue: &str) {
        self.state
            .borrow_mut()
            .bindings
            .entry(exchange.to_string())
            .or_default()
            .push(queue.to_string());
    }

    fn publish(&self, exchange: &str, body: Vec<u8>, properties: MessageProperties) {
        let mut state = self.state.borrow_mut();
        state.prune_queues();
        *state.published.entry(exchange.to_string()).or_default() += 1;

        let bound = state.bindings.remove(exchange).unwrap_or_default();
        let mut alive = Vec::with_capacity(bound.len());
        for queue in bound {
            let delivery = Delivery {
                delivery_tag: state.next_tag(),
                exchange: exchange.to_string(),
                body: body.clone(),
                properties: properties.clone(),
            };
            let delivered = state
                .queues
                .get(&queue)
                .is_some_and(|entry| entry.sender.send(delivery).is_ok());
            if delivered {
                alive.push(queue);
            } else {
                // Consumer gone: auto-delete the queue.
                state.queues.remove(&queue);
            }
        }
        if !alive.is_empty() {
            state.bindings.insert(exchange.to_string(), alive);
        }
    }

    fn send_to_queue(&self, queue: &str, body: Vec<u8>, properties: MessageProperties) {
        let mut state = self.state.borrow_mut();
        let delivery_tag = state.next_tag();
        let Some(entry) = state.queues.get(queue) else {
            tracing::debug!(queue, "dropping message for unknown queue");
            return;
        };
        if entry.expires_at.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::debug!(queue, "dropping message for expired queue");
            state.queues.remove(queue);
            return;
        }
        let delivery = Delivery {
            delivery_tag,
            exchange: String::new(),
            body,
            properties,
        };
        if entry.sender.send(delivery).is_err() {
            state.queues.remove(queue);
        }
    }

    fn ack(&self) {
        self.state.borrow_mut().acked += 1;
    }
}

impl Default for BrokerHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's connection to a [`BrokerHub`].
#[derive(Debug)]
pub struct InMemoryBroker {
    hub: Rc<BrokerHub>,
    session: Cell<Option<u64>>,
}

impl InMemoryBroker {
    /// Disconnected broker handle for `hub`; call
    /// [`connect`](Broker::connect) before use.
    pub fn new(hub: Rc<BrokerHub>) -> Self {
        Self {
            hub,
            session: Cell::new(None),
        }
    }

    /// The shared hub.
    pub fn hub(&self) -> &Rc<BrokerHub> {
        &self.hub
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait(?Send)]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if !self.hub.is_available() {
            return Err(BrokerError::ConnectionRefused(
                "in-memory broker unavailable".to_string(),
            ));
        }
        self.session.set(Some(self.hub.epoch()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.hub.is_available() && self.session.get() == Some(self.hub.epoch())
    }

    async fn subscribe(&self, exchange: &str) -> Result<Subscription, BrokerError> {
        self.ensure_connected()?;
        let (queue, receiver) = self.hub.declare_queue(None);
        self.hub.bind(exchange, &queue);
        Ok(Subscription::new(exchange, queue, receiver))
    }

    async fn publish(
        &self,
        exchange: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.hub.publish(exchange, body, properties);
        Ok(())
    }

    async fn declare_reply_queue(
        &self,
        expires_after: Duration,
    ) -> Result<ReplyQueue, BrokerError> {
        self.ensure_connected()?;
        let (queue, receiver) = self.hub.declare_queue(Some(Instant::now() + expires_after));
        Ok(ReplyQueue::new(queue, receiver))
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.hub.send_to_queue(queue, body, properties);
        Ok(())
    }

    fn ack(&self, _delivery_tag: u64) {
        self.hub.ack();
    }
}
