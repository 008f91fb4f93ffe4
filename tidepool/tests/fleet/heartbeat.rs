//! Heartbeat eviction timing with the default tuning (6 s ping, 20 s
//! pong delay, threshold 2): a silent socket is evicted by the check of
//! its first sweep, 6 s + 20 s after the router started, by which time four
//! pings are pending.

use std::time::Duration;

use tidepool::{Liveness, RouterEvent};
use tokio::time::Instant;

use crate::harness::{run_local, test_config, Fleet};

#[tokio::test(start_paused = true)]
async fn test_silent_socket_is_evicted() {
    run_local(async {
        let started = Instant::now();
        let fleet = Fleet::start(2, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect_silent("device-1");

        tokio::time::sleep_until(started + Duration::from_secs(25)).await;
        assert!(node.router.get_connection("device-1").is_some());
        assert_ne!(handle.liveness(), Liveness::Healthy);

        tokio::time::sleep_until(started + Duration::from_secs(27)).await;
        assert!(node.router.get_connection("device-1").is_none());
        assert_eq!(node.transport.close_calls(&handle), 1);
        assert!(!fleet
            .node(1)
            .router
            .exists_globally("device-1")
            .await
            .expect("readable"));

        let events = node.drain_events().await;
        assert!(events
            .iter()
            .any(|event| matches!(event, RouterEvent::Close(_))));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_ponging_socket_is_kept() {
    run_local(async {
        let started = Instant::now();
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect("device-1");

        tokio::time::sleep_until(started + Duration::from_secs(63)).await;

        assert!(node.transport.ping_count(&handle) >= 10);
        assert_eq!(handle.pending_pings(), 0);
        assert!(handle.is_healthy());
        assert!(node.router.get_connection("device-1").is_some());
        assert_eq!(node.transport.close_calls(&handle), 0);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_socket_recovering_before_threshold_is_kept() {
    run_local(async {
        let started = Instant::now();
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect_silent("device-1");

        // Misses the sweeps at 6 s and 12 s, answers from 18 s on.
        tokio::time::sleep_until(started + Duration::from_secs(15)).await;
        node.transport.set_responsive(&handle, true);

        tokio::time::sleep_until(started + Duration::from_secs(60)).await;
        assert!(node.router.get_connection("device-1").is_some());
        assert_eq!(handle.pending_pings(), 0);
        fleet.shutdown();
    })
    .await;
}
