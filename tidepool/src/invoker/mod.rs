//! Cross-node remote invocation over the message broker.
//!
//! Every node plays two roles at once:
//!
//! ```text
//!  caller (any node)                         responders (every node)
//!  ─────────────────                         ───────────────────────
//!  declare reply queue Q (expires)
//!  register pending[corr]
//!  publish {method,key,message} ──DIST_FUNC_EXCHANGE──▶ serve loop
//!      reply_to = Q, correlation_id = corr           │ ack, decode
//!                                                    │ key local? no ──▶ silent
//!                                                    │ yes: run on Transport
//!  resolve pending[corr]  ◀──────── Q ────────────── reply SUCCESS | FAIL
//!  (or Unreachable after the timeout)
//! ```
//!
//! Exactly one node holds a key, so at most one reply arrives. The caller
//! cannot tell "no node holds the key" from "the owner is slow": both end
//! in [`RouterError::Unreachable`].
//!
//! Tasks are spawned with `spawn_local`: call [`RemoteInvoker::start`]
//! from inside a `tokio::task::LocalSet`.

mod link;
mod pending;
mod wire;

pub use link::{BrokerLink, LinkState};
pub use pending::{InvocationResult, PendingInvocation, PendingInvocations};
pub use wire::{DecodeError, RemoteMethod, RemoteRequest, ReplyMarker};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, Delivery, MessageProperties, Subscription};
use crate::config::ReconnectPolicy;
use crate::constants::DIST_FUNC_EXCHANGE;
use crate::error::RouterError;
use crate::transport::TransportError;

/// Executes requests for keys this node owns.
#[async_trait(?Send)]
pub trait LocalHandler: fmt::Debug {
    /// Run `request` locally.
    ///
    /// Returns `None` when the key is not held by this node, which keeps
    /// the responder silent.
    async fn handle(&self, request: &RemoteRequest) -> Option<Result<(), TransportError>>;
}

/// Broker-mediated RPC endpoint of one node.
#[derive(Debug)]
pub struct RemoteInvoker {
    link: BrokerLink,
    pending: PendingInvocations,
    timeout: Duration,
    handler: RefCell<Option<Rc<dyn LocalHandler>>>,
    serve_task: RefCell<Option<JoinHandle<()>>>,
}

impl RemoteInvoker {
    /// Invoker over `broker`. Nothing happens until [`start`](Self::start).
    pub fn new(broker: Rc<dyn Broker>, policy: ReconnectPolicy, timeout: Duration) -> Self {
        Self {
            link: BrokerLink::new(broker, policy),
            pending: PendingInvocations::new(),
            timeout,
            handler: RefCell::new(None),
            serve_task: RefCell::new(None),
        }
    }

    /// Connect, subscribe to the request exchange and start serving
    /// requests with `handler`.
    pub async fn start(self: &Rc<Self>, handler: Rc<dyn LocalHandler>) -> Result<(), RouterError> {
        *self.handler.borrow_mut() = Some(handler);
        self.connect_and_serve().await
    }

    /// Re-establish a link that went down.
    pub async fn reconnect(self: &Rc<Self>) -> Result<(), RouterError> {
        tracing::info!("broker reconnect requested");
        self.connect_and_serve().await
    }

    /// Stop serving requests. In-flight invocations end at their timeout.
    pub fn shutdown(&self) {
        if let Some(task) = self.serve_task.borrow_mut().take() {
            task.abort();
        }
    }

    /// Run `request` on whichever node holds its key.
    ///
    /// Suspends only the calling task until the single reply or the
    /// timeout, whichever comes first.
    pub async fn invoke(&self, request: RemoteRequest) -> Result<(), RouterError> {
        if self.link.is_down() {
            return Err(RouterError::BrokerLinkDown {
                attempts: self.link.last_attempts(),
            });
        }

        let body = request.encode()?;
        let key = request.key.clone();
        let correlation_id = Uuid::new_v4().to_string();
        let broker = self.link.broker();

        let mut replies = broker.declare_reply_queue(self.timeout).await?;
        let mut outcome = self.pending.register(correlation_id.clone(), request);

        let properties = MessageProperties {
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(replies.name().to_string()),
        };
        if let Err(error) = broker.publish(DIST_FUNC_EXCHANGE, body, properties).await {
            self.pending.discard(&correlation_id);
            return Err(error.into());
        }
        tracing::debug!(%key, %correlation_id, "remote invocation published");

        let wait = async {
            let mut replies_open = true;
            loop {
                tokio::select! {
                    biased;
                    result = &mut outcome => {
                        return result.unwrap_or_else(|_| {
                            Err(RouterError::Unreachable { key: key.clone(), timeout: self.timeout })
                        });
                    }
                    delivery = replies.recv(), if replies_open => match delivery {
                        Some(delivery) => self.on_reply(delivery),
                        None => replies_open = false,
                    },
                }
            }
        };

        let waited = tokio::time::timeout(self.timeout, wait).await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                self.pending.discard(&correlation_id);
                tracing::debug!(%key, %correlation_id, "remote invocation timed out");
                Err(RouterError::Unreachable {
                    key,
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Current broker link state.
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Watch broker link state transitions.
    pub fn subscribe_link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe_state()
    }

    /// The broker this invoker talks through.
    pub fn broker(&self) -> &Rc<dyn Broker> {
        self.link.broker()
    }

    /// Invocations awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect_and_serve(self: &Rc<Self>) -> Result<(), RouterError> {
        let subscription = match self.open_subscription().await {
            Ok(subscription) => subscription,
            Err(error) => {
                self.fail_pending();
                return Err(error);
            }
        };
        let task = tokio::task::spawn_local(Rc::clone(self).serve(subscription));
        if let Some(previous) = self.serve_task.borrow_mut().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn open_subscription(&self) -> Result<Subscription, RouterError> {
        self.link.establish().await?;
        match self.link.broker().subscribe(DIST_FUNC_EXCHANGE).await {
            Ok(subscription) => Ok(subscription),
            Err(error) => {
                self.link.mark_down(self.link.last_attempts().max(1));
                Err(error.into())
            }
        }
    }

    async fn serve(self: Rc<Self>, mut subscription: Subscription) {
        tracing::debug!(queue = subscription.queue_name(), "serving remote requests");
        loop {
            match subscription.recv().await {
                Some(delivery) => self.on_request(delivery).await,
                None => {
                    tracing::warn!("request subscription lost, reconnecting");
                    match self.open_subscription().await {
                        Ok(resumed) => subscription = resumed,
                        Err(error) => {
                            tracing::error!(%error, "stopped serving remote requests");
                            self.fail_pending();
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn on_request(&self, delivery: Delivery) {
        let broker = self.link.broker();
        broker.ack(delivery.delivery_tag);

        let request = match RemoteRequest::decode(&delivery.body) {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(%error, "ignoring remote request");
                return;
            }
        };
        let handler = self.handler.borrow().clone();
        let Some(handler) = handler else {
            return;
        };
        let Some(outcome) = handler.handle(&request).await else {
            return;
        };

        let marker = match outcome {
            Ok(()) => ReplyMarker::Success,
            Err(error) => {
                tracing::warn!(key = %request.key, %error, "remote request failed locally");
                ReplyMarker::Failure
            }
        };
        let MessageProperties {
            correlation_id,
            reply_to,
        } = delivery.properties;
        let (Some(correlation_id), Some(reply_to)) = (correlation_id, reply_to) else {
            tracing::debug!(key = %request.key, "request had no reply address");
            return;
        };
        let properties = MessageProperties {
            correlation_id: Some(correlation_id),
            reply_to: None,
        };
        if let Err(error) = broker
            .send_to_queue(&reply_to, marker.as_bytes().to_vec(), properties)
            .await
        {
            tracing::warn!(key = %request.key, %error, "failed to send reply");
        }
    }

    fn on_reply(&self, delivery: Delivery) {
        match delivery.properties.correlation_id.as_deref() {
            Some(correlation_id) => {
                self.pending
                    .resolve(correlation_id, ReplyMarker::from_bytes(&delivery.body));
            }
            None => tracing::debug!("discarding reply without correlation id"),
        }
    }

    fn fail_pending(&self) {
        let attempts = self.link.last_attempts();
        let failed = self
            .pending
            .fail_all(|| RouterError::BrokerLinkDown { attempts });
        if failed > 0 {
            tracing::warn!(failed, "failed pending invocations, broker link down");
        }
    }
}
