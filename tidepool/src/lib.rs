//! # Tidepool
//!
//! Route messages to long-lived sockets held anywhere in a fleet of nodes.
//!
//! Each node terminates some client connections and registers them under
//! an application-chosen [`SocketKey`]. Any node can then [`send`] to or
//! [`close`] a socket by key without knowing which node holds it:
//!
//! - a process-local [`ConnectionRegistry`] maps keys to owned handles,
//! - an [`ExistenceIndex`] over a shared [`Store`] answers "is this key
//!   connected anywhere?" without a broadcast,
//! - a [`RemoteInvoker`] fans requests out over a [`Broker`] and correlates
//!   the single reply from the owning node,
//! - a [`LivenessMonitor`] pings sockets and evicts the silent ones.
//!
//! The [`Router`] binds them together.
//!
//! ## Execution model
//!
//! Single-threaded per node: state lives in `Rc`/`RefCell`, collaborator
//! traits are `?Send`, and background work runs on a
//! [`tokio::task::LocalSet`].
//!
//! ```rust,ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let (transport, transport_events) = InMemoryTransport::new();
//!     let router = Router::builder()
//!         .transport(Rc::new(transport), transport_events)
//!         .broker(Rc::new(InMemoryBroker::new(hub)))
//!         .store(store)
//!         .build()?;
//!     router.start().await?;
//!     router.send("device-1", "hello").await
//! }).await
//! ```
//!
//! [`send`]: Router::send
//! [`close`]: Router::close

#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod existence;
pub mod invoker;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod store;
pub mod transport;
pub mod types;

pub use broker::{Broker, BrokerError, BrokerHub, InMemoryBroker};
pub use config::{
    BrokerOptions, HeartbeatConfig, InvocationConfig, ReconnectPolicy, RouterConfig,
    StoreOptions, TransportOptions,
};
pub use connection::{Connection, ConnectionHandle, Liveness};
pub use error::{ConfigError, RouterError};
pub use existence::ExistenceIndex;
pub use invoker::{LinkState, LocalHandler, RemoteInvoker, RemoteMethod, RemoteRequest};
pub use liveness::{LivenessMonitor, SweepSnapshot};
pub use registry::{ConnectionRegistry, KeySnapshot, RegistryObserver};
pub use router::{Router, RouterBuilder, RouterEvent};
pub use store::{InMemoryStore, Store, StoreError};
pub use transport::{InMemoryTransport, Transport, TransportError, TransportEvent};
pub use types::{ConnectionId, Metadata, SocketKey};
