//! Router builder: wires the collaborators once at startup.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::{mpsc, Mutex};

use super::global::GlobalBroadcast;
use super::Router;
use crate::broker::Broker;
use crate::config::RouterConfig;
use crate::error::{ConfigError, RouterError};
use crate::existence::ExistenceIndex;
use crate::invoker::RemoteInvoker;
use crate::liveness::LivenessMonitor;
use crate::registry::ConnectionRegistry;
use crate::store::Store;
use crate::transport::{Transport, TransportEvent};

/// Builder for [`Router`] with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// let (transport, transport_events) = InMemoryTransport::new();
/// let router = Router::builder()
///     .config(RouterConfig::default().with_node_name("edge-1"))
///     .transport(Rc::new(transport), transport_events)
///     .broker(Rc::new(InMemoryBroker::new(hub)))
///     .store(store)
///     .build()?;
/// router.start().await?;
/// ```
#[derive(Debug, Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    transport: Option<(Rc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>)>,
    broker: Option<Rc<dyn Broker>>,
    store: Option<Rc<dyn Store>>,
}

impl RouterBuilder {
    /// Builder with the default configuration and no collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Connection transport and the receiving end of its events (required).
    pub fn transport(
        mut self,
        transport: Rc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        self.transport = Some((transport, events));
        self
    }

    /// Message broker connection (required).
    pub fn broker(mut self, broker: Rc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Shared existence store (required).
    pub fn store(mut self, store: Rc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and assemble the router.
    ///
    /// Nothing runs until [`Router::start`].
    pub fn build(self) -> Result<Router, RouterError> {
        self.config.validate()?;
        let (transport, transport_events) = self
            .transport
            .ok_or_else(|| ConfigError::Invalid("transport is required".to_string()))?;
        let broker = self
            .broker
            .ok_or_else(|| ConfigError::Invalid("broker is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| ConfigError::Invalid("store is required".to_string()))?;

        let config = self.config;
        let existence = Rc::new(ExistenceIndex::new(store));
        let registry = Rc::new(ConnectionRegistry::with_observer(existence.clone()));
        let liveness = Rc::new(LivenessMonitor::new(
            registry.clone(),
            transport.clone(),
            config.heartbeat,
        ));
        let invoker = Rc::new(RemoteInvoker::new(
            broker,
            config.broker.reconnect,
            config.invocation.timeout(),
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let global = Rc::new(GlobalBroadcast::new(invoker.clone(), events_tx.clone()));

        tracing::debug!(node = %config.node_name, "router built");
        Ok(Router {
            config,
            registry,
            existence,
            transport,
            invoker,
            liveness,
            global,
            transport_events: RefCell::new(Some(transport_events)),
            events_tx,
            events_rx: Mutex::new(events_rx),
            tasks: RefCell::new(Vec::new()),
        })
    }
}
