//! Broker link loss, exhaustion and recovery.

use std::time::Duration;

use tidepool::{LinkState, ReconnectPolicy, RouterConfig, RouterError};
use tokio::time::Instant;

use crate::harness::{run_local, test_config, Fleet, INVOCATION_TIMEOUT};

fn impatient_config() -> RouterConfig {
    test_config().with_reconnect(ReconnectPolicy::new(
        2,
        Duration::from_millis(500),
        Duration::from_secs(3),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_fails_pending_invocations() {
    run_local(async {
        let fleet = Fleet::start(2, impatient_config()).await;
        let caller = fleet.node(0);

        let outage = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            fleet.hub.fail();
        };
        let started = Instant::now();
        let (result, ()) = tokio::join!(caller.router.send("ghost", "x"), outage);

        assert!(matches!(
            result,
            Err(RouterError::BrokerLinkDown { attempts: 2 })
        ));
        assert!(started.elapsed() < INVOCATION_TIMEOUT);
        assert_eq!(caller.router.link_state(), LinkState::Down);

        let started = Instant::now();
        let fast = caller.router.close("ghost").await;
        assert!(matches!(fast, Err(RouterError::BrokerLinkDown { .. })));
        assert_eq!(started.elapsed(), Duration::ZERO);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_local_features_survive_link_loss() {
    run_local(async {
        let fleet = Fleet::start(1, impatient_config()).await;
        let node = fleet.node(0);
        fleet.hub.fail();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(node.router.link_state(), LinkState::Down);

        node.connect("device-1");
        assert_eq!(node.router.connection_count(), 1);
        assert!(node
            .router
            .exists_globally("device-1")
            .await
            .expect("store is independent of the broker"));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reconnect_restores_routing() {
    run_local(async {
        let fleet = Fleet::start(2, impatient_config()).await;
        let handle = fleet.node(1).connect("device-1");

        fleet.hub.fail();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fleet.node(0).router.link_state(), LinkState::Down);

        fleet.hub.restore();
        for node in &fleet.nodes {
            node.router
                .reconnect_broker()
                .await
                .expect("broker is back");
            assert_eq!(node.router.link_state(), LinkState::Up);
        }

        fleet
            .node(0)
            .router
            .send("device-1", "after outage")
            .await
            .expect("routed again");
        assert_eq!(
            fleet.node(1).transport.sent_to(&handle),
            vec![b"after outage".to_vec()]
        );
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_short_outage_recovers_without_intervention() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let handle = fleet.node(1).connect("device-1");

        fleet.hub.fail();
        tokio::time::sleep(Duration::from_secs(1)).await;
        fleet.hub.restore();
        tokio::time::sleep(Duration::from_secs(5)).await;

        for node in &fleet.nodes {
            assert_eq!(node.router.link_state(), LinkState::Up);
        }
        fleet
            .node(0)
            .router
            .send("device-1", "resumed")
            .await
            .expect("routed after automatic reconnect");
        assert_eq!(
            fleet.node(1).transport.sent_to(&handle),
            vec![b"resumed".to_vec()]
        );
        fleet.shutdown();
    })
    .await;
}
