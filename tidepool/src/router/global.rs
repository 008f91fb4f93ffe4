//! Tag-based broadcast of inbound socket messages to the whole fleet.
//!
//! A node subscribing to `(tag_field, tag)` forwards every inbound socket
//! message whose JSON object has `tag_field == tag` to the fan-out exchange
//! `GLOBAL_MESSAGE_SUBSCRIBE_<tag>`, and surfaces everything published
//! there as [`RouterEvent::GlobalMessage`].

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event::RouterEvent;
use crate::broker::{MessageProperties, Subscription};
use crate::constants::global_message_exchange;
use crate::error::RouterError;
use crate::invoker::{LinkState, RemoteInvoker};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagSubscription {
    tag_field: String,
    tag: String,
}

impl TagSubscription {
    fn matches(&self, message: &serde_json::Map<String, Value>) -> bool {
        message.get(&self.tag_field).and_then(Value::as_str) == Some(self.tag.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct GlobalBroadcast {
    invoker: Rc<RemoteInvoker>,
    events: mpsc::UnboundedSender<RouterEvent>,
    subscriptions: RefCell<Vec<TagSubscription>>,
    listeners: RefCell<Vec<JoinHandle<()>>>,
}

impl GlobalBroadcast {
    pub(crate) fn new(
        invoker: Rc<RemoteInvoker>,
        events: mpsc::UnboundedSender<RouterEvent>,
    ) -> Self {
        Self {
            invoker,
            events,
            subscriptions: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Start forwarding and receiving messages tagged `tag`.
    pub(crate) async fn subscribe(&self, tag_field: &str, tag: &str) -> Result<(), RouterError> {
        let wanted = TagSubscription {
            tag_field: tag_field.to_string(),
            tag: tag.to_string(),
        };
        if self.subscriptions.borrow().contains(&wanted) {
            return Ok(());
        }

        let exchange = global_message_exchange(tag);
        let subscription = self.invoker.broker().subscribe(&exchange).await?;
        self.subscriptions.borrow_mut().push(wanted);

        let listener = tokio::task::spawn_local(listen(
            Rc::clone(&self.invoker),
            self.events.clone(),
            tag.to_string(),
            subscription,
        ));
        self.listeners.borrow_mut().push(listener);
        tracing::info!(tag_field, tag, %exchange, "subscribed to global messages");
        Ok(())
    }

    /// Publish `payload` to every tag it matches.
    pub(crate) async fn forward(&self, payload: &[u8]) {
        let matching: Vec<String> = {
            let subscriptions = self.subscriptions.borrow();
            if subscriptions.is_empty() {
                return;
            }
            let Ok(Value::Object(message)) = serde_json::from_slice::<Value>(payload) else {
                return;
            };
            subscriptions
                .iter()
                .filter(|subscription| subscription.matches(&message))
                .map(|subscription| subscription.tag.clone())
                .collect()
        };

        for tag in matching {
            let exchange = global_message_exchange(&tag);
            let published = self
                .invoker
                .broker()
                .publish(&exchange, payload.to_vec(), MessageProperties::default())
                .await;
            match published {
                Ok(()) => tracing::debug!(%tag, "global message published"),
                Err(error) => tracing::warn!(%tag, %error, "failed to publish global message"),
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        for listener in self.listeners.borrow_mut().drain(..) {
            listener.abort();
        }
    }
}

/// The `message` field applications put the broadcast content in.
fn message_field(payload: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(mut object)) => object.remove("message"),
        _ => None,
    }
}

async fn listen(
    invoker: Rc<RemoteInvoker>,
    events: mpsc::UnboundedSender<RouterEvent>,
    tag: String,
    mut subscription: Subscription,
) {
    let exchange = global_message_exchange(&tag);
    let mut link = invoker.subscribe_link_state();
    loop {
        while let Some(delivery) = subscription.recv().await {
            invoker.broker().ack(delivery.delivery_tag);
            let event = RouterEvent::GlobalMessage {
                tag: tag.clone(),
                message: message_field(&delivery.body),
                payload: delivery.body,
            };
            if events.send(event).is_err() {
                return;
            }
        }

        tracing::warn!(%tag, "global message subscription lost");
        loop {
            let up = *link.borrow_and_update() == LinkState::Up;
            if up && invoker.broker().is_connected() {
                match invoker.broker().subscribe(&exchange).await {
                    Ok(resumed) => {
                        tracing::info!(%tag, "global message subscription resumed");
                        subscription = resumed;
                        break;
                    }
                    Err(error) => tracing::warn!(%tag, %error, "global resubscribe failed"),
                }
            }
            if link.changed().await.is_err() {
                return;
            }
        }
    }
}
