//! Three-node fleet in one process.
//!
//! ```bash
//! cargo run --example fleet
//! cargo run --example fleet -- path/to/tidepool.toml
//! RUST_LOG=debug cargo run --example fleet
//! ```
//!
//! Shows a socket registered on one node being messaged and closed from
//! another, fleet-wide existence queries, and heartbeat eviction of a
//! client that stopped answering pings.

use std::rc::Rc;
use std::time::Duration;

use tidepool::{
    BrokerHub, HeartbeatConfig, InMemoryBroker, InMemoryStore, InMemoryTransport, Metadata,
    Router, RouterConfig, RouterError,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Node {
    router: Router,
    transport: Rc<InMemoryTransport>,
}

fn load_config() -> Result<RouterConfig, RouterError> {
    let config = match std::env::args().nth(1) {
        Some(path) => RouterConfig::load(path)?,
        // Fast heartbeat so the eviction is visible within seconds.
        None => RouterConfig::default().with_heartbeat(HeartbeatConfig::new(
            Duration::from_millis(500),
            Duration::from_secs(1),
            2,
        )),
    };
    Ok(config)
}

async fn start_node(
    index: usize,
    config: &RouterConfig,
    hub: &Rc<BrokerHub>,
    store: &Rc<InMemoryStore>,
) -> Result<Node, RouterError> {
    let (transport, transport_events) = InMemoryTransport::new();
    let transport = Rc::new(transport);
    let router = Router::builder()
        .config(config.clone().with_node_name(format!("node-{index}")))
        .transport(transport.clone(), transport_events)
        .broker(Rc::new(InMemoryBroker::new(hub.clone())))
        .store(store.clone())
        .build()?;
    router.start().await?;
    Ok(Node { router, transport })
}

async fn run_fleet() -> Result<(), RouterError> {
    let config = load_config()?;
    let hub = Rc::new(BrokerHub::new());
    let store = Rc::new(InMemoryStore::new());

    let mut nodes = Vec::new();
    for index in 0..3 {
        nodes.push(start_node(index, &config, &hub, &store).await?);
    }

    let mut metadata = Metadata::new();
    metadata.insert("merchantId".into(), "beautybeagle".into());
    metadata.insert("registerNo".into(), "4".into());
    let register = nodes[1].transport.open();
    nodes[1]
        .router
        .store_connection("beautybeagle-4", register.clone(), metadata);

    let exists = nodes[2].router.exists_globally("beautybeagle-4").await?;
    tracing::info!(exists, "node-2 asks whether beautybeagle-4 is connected");

    nodes[0]
        .router
        .send("beautybeagle-4", r#"{"type":"PRINT","receipt":42}"#)
        .await?;
    tracing::info!(
        delivered = nodes[1].transport.sent_to(&register).len(),
        "node-0 sent to a socket held by node-1"
    );

    match nodes[0].router.send("nobody-home", "hello?").await {
        Err(error) => tracing::info!(%error, "send to an unknown key"),
        Ok(()) => tracing::warn!("unknown key answered"),
    }

    nodes[2].router.close("beautybeagle-4").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tracing::info!(
        registered = nodes[1].router.connection_count(),
        "node-2 closed the socket held by node-1"
    );

    let silent = nodes[0].transport.open();
    nodes[0].transport.set_responsive(&silent, false);
    nodes[0]
        .router
        .store_connection("silent-device", silent, Metadata::new());
    let heartbeat = config.heartbeat;
    let window = heartbeat.ping_interval() * (heartbeat.unhealthy_threshold + 1)
        + heartbeat.pong_delay()
        + heartbeat.ping_interval();
    tokio::time::sleep(window).await;
    tracing::info!(
        still_exists = nodes[1].router.exists_globally("silent-device").await?,
        "silent client after the heartbeat window"
    );

    for node in &nodes {
        node.router.shutdown();
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tidepool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            if let Err(error) = run_fleet().await {
                tracing::error!(%error, "fleet demo failed");
            }
        })
        .await;
    Ok(())
}
