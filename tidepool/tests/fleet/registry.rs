//! Registry and existence index behavior seen through the router.

use std::collections::HashSet;
use std::rc::Rc;

use tidepool::{Metadata, RouterError, RouterEvent, StoreError, TransportError};

use crate::harness::{run_local, test_config, Fleet};

#[tokio::test(start_paused = true)]
async fn test_last_store_wins() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let node = fleet.node(0);
        let first = node.transport.open();
        let second = node.transport.open();

        node.router
            .store_connection("beautybeagle-4", first.clone(), Metadata::new());
        let replaced = node
            .router
            .store_connection("beautybeagle-4", second.clone(), Metadata::new())
            .expect("previous handle returned");

        assert!(Rc::ptr_eq(&replaced, &first));
        let current = node
            .router
            .get_connection("beautybeagle-4")
            .expect("registered");
        assert!(Rc::ptr_eq(&current, &second));

        let keys = node.router.list_connections();
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(unique.len(), 1);

        fleet
            .node(1)
            .router
            .send("beautybeagle-4", "ping")
            .await
            .expect("delivered");
        assert!(node.transport.sent_to(&first).is_empty());
        assert_eq!(node.transport.sent_to(&second), vec![b"ping".to_vec()]);
        assert_eq!(node.transport.close_calls(&first), 0);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_existence_mirrors_registry() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        let (owner, other) = (fleet.node(0), fleet.node(1));

        owner.connect("device-1");
        assert!(other
            .router
            .exists_globally("device-1")
            .await
            .expect("readable"));
        assert_eq!(owner.router.connection_count(), 1);

        owner.router.remove_connection("device-1");
        assert!(!other
            .router
            .exists_globally("device-1")
            .await
            .expect("readable"));
        assert_eq!(owner.router.connection_count(), 0);

        assert!(owner.router.remove_connection("device-1").is_none());
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_client_close_unregisters_before_event() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect("device-1");

        node.transport.disconnect(&handle);
        let events = node.drain_events().await;

        assert!(matches!(events.first(), Some(RouterEvent::Connection(_))));
        assert!(matches!(events.last(), Some(RouterEvent::Close(_))));
        assert!(node.router.get_connection("device-1").is_none());
        assert!(!node
            .router
            .exists_globally("device-1")
            .await
            .expect("readable"));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_close_keeps_replacement() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let old = node.connect("device-1");
        let new = node.connect("device-1");

        node.transport.terminate(&old);
        let events = node.drain_events().await;

        assert!(events
            .iter()
            .any(|event| matches!(event, RouterEvent::Terminate(h) if Rc::ptr_eq(h, &old))));
        let current = node.router.get_connection("device-1").expect("kept");
        assert!(Rc::ptr_eq(&current, &new));
        assert!(node
            .router
            .exists_globally("device-1")
            .await
            .expect("readable"));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_socket_error_unregisters() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect("device-1");

        node.transport
            .error(&handle, TransportError::Protocol("bad frame".into()));
        let events = node.drain_events().await;

        assert!(events.iter().any(|event| matches!(
            event,
            RouterEvent::SocketError { error: TransportError::Protocol(_), .. }
        )));
        assert_eq!(node.router.connection_count(), 0);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_are_surfaced() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        let handle = node.connect("device-1");

        node.transport.deliver(&handle, b"{\"hello\":1}".to_vec());
        let events = node.drain_events().await;

        assert!(events.iter().any(|event| matches!(
            event,
            RouterEvent::Message { connection, payload }
                if Rc::ptr_eq(connection, &handle) && payload == b"{\"hello\":1}"
        )));
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_surfaces_on_strict_lookup() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        fleet.node(0).connect("device-1");
        fleet.store.set_available(false);

        let result = fleet.node(0).router.exists_globally("device-1").await;
        assert!(matches!(
            result,
            Err(RouterError::StoreRead(StoreError::Unavailable))
        ));
        fleet.shutdown();
    })
    .await;
}
