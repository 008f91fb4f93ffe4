//! The router: one node's view of a fleet-wide socket namespace.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────── Router ─────────────────────┐
//!  Transport events ─▶ event pump ──▶ RouterEvent channel ──▶ next_event()
//!                    │     │ pong          │ close/error                 │
//!                    │     ▼               ▼                             │
//!                    │  LivenessMonitor ─▶ ConnectionRegistry ─observer─▶ ExistenceIndex ─▶ Store
//!                    │                      ▲                            │
//!  send()/close() ───┼─▶ RemoteInvoker ─────┘ (LocalDispatch)            │
//!                    │        │  ▲                                       │
//!                    └────────┼──┼───────────────────────────────────────┘
//!                             ▼  │
//!                            Broker (fan-out + reply queues)
//! ```
//!
//! `send` and `close` always travel through the broker, even when the key
//! is held locally: exactly one node (the owner) executes them.
//!
//! Tasks are spawned with `spawn_local`, so [`Router::start`] must run
//! inside a `tokio::task::LocalSet`.

mod builder;
mod event;
mod global;

pub use builder::RouterBuilder;
pub use event::RouterEvent;

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use self::global::GlobalBroadcast;
use crate::config::RouterConfig;
use crate::connection::ConnectionHandle;
use crate::error::RouterError;
use crate::existence::ExistenceIndex;
use crate::invoker::{LinkState, LocalHandler, RemoteInvoker, RemoteMethod, RemoteRequest};
use crate::liveness::LivenessMonitor;
use crate::registry::{ConnectionRegistry, KeySnapshot};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::types::{Metadata, SocketKey};

/// One node of the fleet.
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    registry: Rc<ConnectionRegistry>,
    existence: Rc<ExistenceIndex>,
    transport: Rc<dyn Transport>,
    invoker: Rc<RemoteInvoker>,
    liveness: Rc<LivenessMonitor>,
    global: Rc<GlobalBroadcast>,
    transport_events: RefCell<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<RouterEvent>>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Start building a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Start the event pump, heartbeat, diagnostics and remote invocation.
    ///
    /// Local features keep running when the broker link cannot be
    /// established; the error is still returned. Calling `start` twice is a
    /// no-op.
    pub async fn start(&self) -> Result<(), RouterError> {
        let Some(transport_events) = self.transport_events.borrow_mut().take() else {
            tracing::debug!(node = %self.config.node_name, "router already started");
            return Ok(());
        };

        let pump = EventPump {
            registry: self.registry.clone(),
            liveness: self.liveness.clone(),
            global: self.global.clone(),
            events: self.events_tx.clone(),
        };
        let mut tasks = vec![tokio::task::spawn_local(pump.run(transport_events))];
        if let Some(period) = self.config.diagnostics_interval() {
            tasks.push(tokio::task::spawn_local(log_registry_size(
                self.config.node_name.clone(),
                self.registry.clone(),
                period,
            )));
        }
        self.tasks.borrow_mut().extend(tasks);
        self.liveness.spawn();

        let dispatch = Rc::new(LocalDispatch {
            registry: self.registry.clone(),
            transport: self.transport.clone(),
        });
        self.invoker.start(dispatch).await?;
        tracing::info!(node = %self.config.node_name, "router started");
        Ok(())
    }

    /// Stop every background task. Registered sockets stay open.
    pub fn shutdown(&self) {
        self.invoker.shutdown();
        self.liveness.stop();
        self.global.shutdown();
        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }
        tracing::info!(node = %self.config.node_name, "router stopped");
    }

    /// Register `connection` under `key`, merging `metadata` onto it, and
    /// mark the key present fleet-wide.
    ///
    /// Last store wins: a handle previously stored under `key` is returned
    /// and left open.
    pub fn store_connection(
        &self,
        key: impl Into<SocketKey>,
        connection: ConnectionHandle,
        metadata: Metadata,
    ) -> Option<ConnectionHandle> {
        self.registry.store(key.into(), connection, metadata)
    }

    /// Unregister `key` locally and mark it absent fleet-wide.
    pub fn remove_connection(&self, key: impl Into<SocketKey>) -> Option<ConnectionHandle> {
        self.registry.remove(&key.into())
    }

    /// The connection held locally under `key`.
    pub fn get_connection(&self, key: impl Into<SocketKey>) -> Option<ConnectionHandle> {
        self.registry.get(&key.into())
    }

    /// Keys held by this node.
    pub fn list_connections(&self) -> KeySnapshot {
        self.registry.keys()
    }

    /// Number of sockets held by this node.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Write `message` to the socket `key`, wherever it lives.
    pub async fn send(
        &self,
        key: impl Into<SocketKey>,
        message: impl Into<String>,
    ) -> Result<(), RouterError> {
        let key = key.into();
        self.precheck(&key).await?;
        self.invoker.invoke(RemoteRequest::send(key, message)).await
    }

    /// Close the socket `key`, wherever it lives.
    pub async fn close(&self, key: impl Into<SocketKey>) -> Result<(), RouterError> {
        let key = key.into();
        self.precheck(&key).await?;
        self.invoker.invoke(RemoteRequest::close(key)).await
    }

    /// Whether some node of the fleet holds `key`, per the existence index.
    pub async fn exists_globally(&self, key: impl Into<SocketKey>) -> Result<bool, RouterError> {
        Ok(self.existence.lookup(&key.into()).await?)
    }

    /// Wait for the next event from this node's sockets.
    pub async fn next_event(&self) -> Option<RouterEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Broadcast inbound messages whose `tag_field` equals `tag` to every
    /// node subscribed to `tag`, and receive theirs as
    /// [`RouterEvent::GlobalMessage`].
    pub async fn subscribe_to_global_message(
        &self,
        tag_field: &str,
        tag: &str,
    ) -> Result<(), RouterError> {
        self.global.subscribe(tag_field, tag).await
    }

    /// Re-establish a broker link that went down.
    pub async fn reconnect_broker(&self) -> Result<(), RouterError> {
        self.invoker.reconnect().await
    }

    /// Current broker link state.
    pub fn link_state(&self) -> LinkState {
        self.invoker.link_state()
    }

    /// Configuration this router runs with.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The local registry.
    pub fn registry(&self) -> &Rc<ConnectionRegistry> {
        &self.registry
    }

    /// The heartbeat monitor.
    pub fn liveness(&self) -> &Rc<LivenessMonitor> {
        &self.liveness
    }

    async fn precheck(&self, key: &SocketKey) -> Result<(), RouterError> {
        if !self.config.invocation.precheck_existence {
            return Ok(());
        }
        match self.existence.lookup(key).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RouterError::Absent { key: key.clone() }),
            Err(error) => {
                tracing::debug!(%key, %error, "existence pre-check failed, invoking anyway");
                Ok(())
            }
        }
    }
}

/// Runs remote requests against this node's own sockets.
#[derive(Debug)]
struct LocalDispatch {
    registry: Rc<ConnectionRegistry>,
    transport: Rc<dyn Transport>,
}

#[async_trait(?Send)]
impl LocalHandler for LocalDispatch {
    async fn handle(&self, request: &RemoteRequest) -> Option<Result<(), TransportError>> {
        let connection = self.registry.get(&request.key)?;
        let outcome = match request.method {
            RemoteMethod::Send => {
                let message = request.message.as_deref().unwrap_or_default();
                self.transport.send(&connection, message.as_bytes()).await
            }
            RemoteMethod::Close => {
                self.transport.close(&connection);
                Ok(())
            }
        };
        tracing::debug!(key = %request.key, method = ?request.method, ok = outcome.is_ok(), "remote request executed");
        Some(outcome)
    }
}

/// Turns transport events into registry updates and router events.
struct EventPump {
    registry: Rc<ConnectionRegistry>,
    liveness: Rc<LivenessMonitor>,
    global: Rc<GlobalBroadcast>,
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl EventPump {
    async fn run(self, mut transport_events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = transport_events.recv().await {
            let Some(event) = self.apply(event).await else {
                continue;
            };
            if self.events.send(event).is_err() {
                tracing::debug!("router event dropped, nobody listening");
            }
        }
        tracing::debug!("transport event stream ended");
    }

    async fn apply(&self, event: TransportEvent) -> Option<RouterEvent> {
        match event {
            TransportEvent::Connected(connection) => Some(RouterEvent::Connection(connection)),
            TransportEvent::Message {
                connection,
                payload,
            } => {
                self.global.forward(&payload).await;
                Some(RouterEvent::Message {
                    connection,
                    payload,
                })
            }
            TransportEvent::Closed(connection) => {
                self.registry.remove_connection(&connection);
                Some(RouterEvent::Close(connection))
            }
            TransportEvent::Terminated(connection) => {
                self.registry.remove_connection(&connection);
                Some(RouterEvent::Terminate(connection))
            }
            TransportEvent::Error { connection, error } => {
                tracing::warn!(connection_id = %connection.id(), %error, "socket error");
                self.registry.remove_connection(&connection);
                Some(RouterEvent::SocketError { connection, error })
            }
            TransportEvent::Pong(connection) => {
                self.liveness.record_pong(&connection);
                None
            }
        }
    }
}

async fn log_registry_size(
    node: String,
    registry: Rc<ConnectionRegistry>,
    period: std::time::Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        tracing::info!(%node, connections = registry.len(), "connected sockets");
    }
}
