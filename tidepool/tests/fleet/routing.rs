//! Cross-node send/close routing.

use std::rc::Rc;
use std::time::Duration;

use tidepool::{RouterError, SocketKey};
use tokio::time::Instant;

use crate::harness::{run_local, test_config, Fleet, INVOCATION_TIMEOUT};

#[tokio::test(start_paused = true)]
async fn test_send_reaches_only_the_owner() {
    run_local(async {
        let fleet = Fleet::start(3, test_config()).await;
        let owner = fleet.node(1);
        let handle = owner.connect("device-1");

        for caller in 0..3 {
            fleet
                .node(caller)
                .router
                .send("device-1", format!("hello from {caller}"))
                .await
                .expect("owner acknowledges");
        }

        assert_eq!(
            owner.transport.sent_to(&handle),
            vec![
                b"hello from 0".to_vec(),
                b"hello from 1".to_vec(),
                b"hello from 2".to_vec(),
            ]
        );
        assert!(fleet.node(0).transport.sent().is_empty());
        assert!(fleet.node(2).transport.sent().is_empty());
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_key_is_unreachable_after_timeout() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;

        let started = Instant::now();
        let result = fleet.node(0).router.send("ghost", "anyone?").await;

        match result {
            Err(RouterError::Unreachable { key, timeout }) => {
                assert_eq!(key, SocketKey::from("ghost"));
                assert_eq!(timeout, INVOCATION_TIMEOUT);
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
        assert!(started.elapsed() >= INVOCATION_TIMEOUT);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_round_trip() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let (a, b) = (fleet.node(0), fleet.node(1));
        let handle = a.connect("device-1");

        let started = Instant::now();
        b.router.close("device-1").await.expect("close succeeds");
        assert!(started.elapsed() < INVOCATION_TIMEOUT);

        fleet.settle().await;
        assert_eq!(a.transport.close_calls(&handle), 1);
        assert!(a.router.get_connection("device-1").is_none());
        assert!(!b
            .router
            .exists_globally("device-1")
            .await
            .expect("store readable"));

        let events = a.drain_events().await;
        assert!(events
            .iter()
            .any(|event| matches!(event, tidepool::RouterEvent::Close(closed) if Rc::ptr_eq(closed, &handle))));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_owner_send_failure_is_reported() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let handle = fleet.node(0).connect("device-1");
        fleet.node(0).transport.fail_sends(&handle);

        let result = fleet.node(1).router.send("device-1", "x").await;

        assert!(matches!(
            result,
            Err(RouterError::RemoteFailure { key }) if key.as_str() == "device-1"
        ));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_existence_precheck_fails_fast() {
    run_local(async {
        let fleet = Fleet::start(2, test_config().with_existence_precheck(true)).await;
        let handle = fleet.node(1).connect("device-1");

        let started = Instant::now();
        let result = fleet.node(0).router.send("ghost", "x").await;
        assert!(matches!(result, Err(RouterError::Absent { .. })));
        assert!(started.elapsed() < INVOCATION_TIMEOUT);

        fleet
            .node(0)
            .router
            .send("device-1", "still routed")
            .await
            .expect("present keys are invoked");
        assert_eq!(
            fleet.node(1).transport.sent_to(&handle),
            vec![b"still routed".to_vec()]
        );
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_existence_precheck_ignores_store_outage() {
    run_local(async {
        let fleet = Fleet::start(2, test_config().with_existence_precheck(true)).await;
        fleet.node(1).connect("device-1");
        fleet.store.set_available(false);

        fleet
            .node(0)
            .router
            .send("device-1", "x")
            .await
            .expect("unknown existence falls through to the invocation");
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_invocation_does_not_block_others() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let handle = fleet.node(1).connect("device-1");
        let caller = &fleet.node(0).router;

        let started = Instant::now();
        let ghost = async {
            let result = caller.send("ghost", "anyone?").await;
            (result, started.elapsed())
        };
        let owned = async {
            let result = caller.send("device-1", "meanwhile").await;
            (result, started.elapsed())
        };
        let ((ghost_result, ghost_elapsed), (owned_result, owned_elapsed)) =
            tokio::join!(ghost, owned);

        owned_result.expect("owner acknowledges");
        assert!(owned_elapsed < Duration::from_secs(1));
        assert_eq!(
            fleet.node(1).transport.sent_to(&handle),
            vec![b"meanwhile".to_vec()]
        );

        assert!(matches!(ghost_result, Err(RouterError::Unreachable { .. })));
        assert!(ghost_elapsed >= INVOCATION_TIMEOUT);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_reply_queues_do_not_accumulate() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        fleet.node(1).connect("device-1");
        let baseline = fleet.hub.queue_count();

        for n in 0..50 {
            fleet
                .node(0)
                .router
                .send("device-1", format!("message {n}"))
                .await
                .expect("owner acknowledges");
        }
        let unanswered = fleet.node(0).router.send("ghost", "x").await;
        assert!(matches!(unanswered, Err(RouterError::Unreachable { .. })));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fleet.hub.queue_count(), baseline);
        fleet.shutdown();
    })
    .await;
}
