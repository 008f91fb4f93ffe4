//! In-process fleet: N routers sharing one in-memory broker and store.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tidepool::{
    BrokerHub, ConnectionHandle, InMemoryBroker, InMemoryStore, InMemoryTransport, Metadata,
    Router, RouterConfig, RouterEvent,
};
use tokio::task::LocalSet;

pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `test` on a `LocalSet` with test logging installed.
pub async fn run_local<F: Future<Output = ()>>(test: F) {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    LocalSet::new().run_until(test).await;
}

/// Default configuration with the diagnostics log disabled.
pub fn test_config() -> RouterConfig {
    let mut config = RouterConfig::default().with_invocation_timeout(INVOCATION_TIMEOUT);
    config.diagnostics_interval_ms = 0;
    config
}

pub struct Node {
    pub router: Router,
    pub transport: Rc<InMemoryTransport>,
}

impl Node {
    /// Accept a client and register it under `key`.
    pub fn connect(&self, key: &str) -> ConnectionHandle {
        let handle = self.transport.open();
        self.router
            .store_connection(key, handle.clone(), Metadata::new());
        handle
    }

    /// Accept a client that never answers pings and register it.
    pub fn connect_silent(&self, key: &str) -> ConnectionHandle {
        let handle = self.transport.open();
        self.transport.set_responsive(&handle, false);
        self.router
            .store_connection(key, handle.clone(), Metadata::new());
        handle
    }

    /// Events surfaced so far, waiting briefly for stragglers.
    pub async fn drain_events(&self) -> Vec<RouterEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(10), self.router.next_event()).await
        {
            events.push(event);
        }
        events
    }
}

pub struct Fleet {
    pub hub: Rc<BrokerHub>,
    pub store: Rc<InMemoryStore>,
    pub nodes: Vec<Node>,
}

impl Fleet {
    /// Build and start `size` nodes with `config`.
    pub async fn start(size: usize, config: RouterConfig) -> Self {
        let hub = Rc::new(BrokerHub::new());
        let store = Rc::new(InMemoryStore::new());
        let mut nodes = Vec::with_capacity(size);
        for index in 0..size {
            let (transport, transport_events) = InMemoryTransport::new();
            let transport = Rc::new(transport);
            let router = Router::builder()
                .config(config.clone().with_node_name(format!("node-{index}")))
                .transport(transport.clone(), transport_events)
                .broker(Rc::new(InMemoryBroker::new(hub.clone())))
                .store(store.clone())
                .build()
                .expect("router config is valid");
            router.start().await.expect("router starts");
            nodes.push(Node { router, transport });
        }
        Self { hub, store, nodes }
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Let background tasks process what is queued.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.router.shutdown();
        }
    }
}
