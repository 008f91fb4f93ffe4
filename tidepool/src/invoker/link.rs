//! Broker link state and reconnect loop.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::watch;

use crate::broker::Broker;
use crate::config::ReconnectPolicy;
use crate::error::RouterError;

/// State of this node's broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Connecting or reconnecting.
    Connecting,
    /// Connected and serving.
    Up,
    /// Reconnect attempts exhausted. Only an explicit reconnect revives it.
    Down,
}

/// Broker connection plus its reconnect schedule.
#[derive(Debug)]
pub struct BrokerLink {
    broker: Rc<dyn Broker>,
    policy: ReconnectPolicy,
    state: watch::Sender<LinkState>,
    last_attempts: Cell<u32>,
}

impl BrokerLink {
    /// Link over `broker`, initially connecting.
    pub fn new(broker: Rc<dyn Broker>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        Self {
            broker,
            policy,
            state,
            last_attempts: Cell::new(0),
        }
    }

    /// The underlying broker.
    pub fn broker(&self) -> &Rc<dyn Broker> {
        &self.broker
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Whether invocations should fail fast.
    pub fn is_down(&self) -> bool {
        self.state() == LinkState::Down
    }

    /// Attempts spent by the last failed [`establish`](Self::establish).
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts.get()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Connect, retrying with linear backoff until the policy is exhausted.
    pub async fn establish(&self) -> Result<(), RouterError> {
        self.state.send_replace(LinkState::Connecting);
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.broker.connect().await {
                Ok(()) => {
                    tracing::info!(attempt, "broker link up");
                    self.last_attempts.set(0);
                    self.state.send_replace(LinkState::Up);
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(attempt, max_attempts, %error, "broker connection failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    }
                }
            }
        }
        self.mark_down(max_attempts);
        Err(RouterError::BrokerLinkDown {
            attempts: max_attempts,
        })
    }

    /// Give up on the link.
    pub fn mark_down(&self, attempts: u32) {
        tracing::error!(attempts, "broker link down, reconnect attempts exhausted");
        self.last_attempts.set(attempts);
        self.state.send_replace(LinkState::Down);
    }
}
