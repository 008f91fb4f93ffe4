//! Message broker contract used by the remote invoker and global broadcast.
//!
//! Two primitives are needed:
//!
//! 1. **Fan-out exchanges**: [`Broker::subscribe`] declares an exclusive
//!    queue bound to an exchange; [`Broker::publish`] copies a message into
//!    every queue bound to it.
//! 2. **Reply queues**: [`Broker::declare_reply_queue`] declares an
//!    exclusive, auto-expiring queue whose name travels as `reply_to`;
//!    [`Broker::send_to_queue`] answers into it, echoing the request's
//!    `correlation_id`.
//!
//! Queues belong to the broker connection that declared them: they vanish
//! when their receiver is dropped or when the connection is lost, at which
//! point the receiving end observes `None`.

mod memory;

pub use memory::{BrokerHub, InMemoryBroker};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors from broker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Establishing the connection failed.
    #[error("broker connection refused: {0}")]
    ConnectionRefused(String),

    /// The operation needs a live connection.
    #[error("broker not connected")]
    NotConnected,
}

/// Out-of-band message properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Correlates a reply with the request that caused it.
    pub correlation_id: Option<String>,

    /// Queue the reply must be sent to.
    pub reply_to: Option<String>,
}

/// One message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned tag used for acknowledgement.
    pub delivery_tag: u64,

    /// Exchange the message was published to (empty for direct sends).
    pub exchange: String,

    /// Raw message body.
    pub body: Vec<u8>,

    /// Properties set by the publisher.
    pub properties: MessageProperties,
}

/// Exclusive queue bound to a fan-out exchange.
#[derive(Debug)]
pub struct Subscription {
    exchange: String,
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Wrap the receiving end of a bound queue.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            receiver,
        }
    }

    /// Exchange this subscription is bound to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Broker-generated queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the queue is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// Exclusive, auto-expiring queue receiving replies for one caller.
#[derive(Debug)]
pub struct ReplyQueue {
    name: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl ReplyQueue {
    /// Wrap the receiving end of a reply queue.
    pub fn new(name: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            name: name.into(),
            receiver,
        }
    }

    /// Name to advertise as `reply_to`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next reply, or `None` once the queue is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// One node's connection to the fleet's message broker.
#[async_trait(?Send)]
pub trait Broker: fmt::Debug {
    /// (Re)establish the connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Whether the connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Declare an exclusive queue bound to the fan-out `exchange`.
    async fn subscribe(&self, exchange: &str) -> Result<Subscription, BrokerError>;

    /// Publish `body` to every queue bound to `exchange`.
    async fn publish(
        &self,
        exchange: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Declare an exclusive queue that expires after `expires_after`.
    async fn declare_reply_queue(&self, expires_after: Duration)
        -> Result<ReplyQueue, BrokerError>;

    /// Send `body` directly to the named queue. Unknown or expired queues
    /// silently drop the message.
    async fn send_to_queue(
        &self,
        queue: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Acknowledge a delivery.
    fn ack(&self, delivery_tag: u64);
}
