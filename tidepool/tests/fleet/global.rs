//! Tag-based global broadcast.

use std::time::Duration;

use serde_json::{json, Value};
use tidepool::RouterEvent;

use crate::harness::{run_local, test_config, Fleet, Node};

async fn global_messages(node: &Node) -> Vec<(String, Vec<u8>)> {
    global_events(node)
        .await
        .into_iter()
        .map(|(tag, _, payload)| (tag, payload))
        .collect()
}

async fn global_events(node: &Node) -> Vec<(String, Option<Value>, Vec<u8>)> {
    node.drain_events()
        .await
        .into_iter()
        .filter_map(|event| match event {
            RouterEvent::GlobalMessage {
                tag,
                message,
                payload,
            } => Some((tag, message, payload)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_tagged_messages_reach_subscribed_nodes() {
    run_local(async {
        let fleet = Fleet::start(3, test_config()).await;
        for index in 0..2 {
            fleet
                .node(index)
                .router
                .subscribe_to_global_message("type", "TUNNEL")
                .await
                .expect("subscribed");
        }
        let client = fleet.node(0).connect("device-1");

        let tagged = br#"{"type":"TUNNEL","data":"abc"}"#.to_vec();
        fleet.node(0).transport.deliver(&client, tagged.clone());
        fleet
            .node(0)
            .transport
            .deliver(&client, br#"{"type":"PING"}"#.to_vec());
        fleet.node(0).transport.deliver(&client, b"not json".to_vec());
        fleet.settle().await;

        let expected = vec![("TUNNEL".to_string(), tagged)];
        assert_eq!(global_messages(fleet.node(0)).await, expected);
        assert_eq!(global_messages(fleet.node(1)).await, expected);
        assert!(global_messages(fleet.node(2)).await.is_empty());
        assert_eq!(fleet.hub.published_count("GLOBAL_MESSAGE_SUBSCRIBE_TUNNEL"), 1);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscription_is_ignored() {
    run_local(async {
        let fleet = Fleet::start(1, test_config()).await;
        let node = fleet.node(0);
        for _ in 0..2 {
            node.router
                .subscribe_to_global_message("type", "TUNNEL")
                .await
                .expect("subscribed");
        }
        let client = node.connect("device-1");

        node.transport
            .deliver(&client, br#"{"type":"TUNNEL"}"#.to_vec());
        fleet.settle().await;

        assert_eq!(global_messages(node).await.len(), 1);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_global_subscription_resumes_after_outage() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        for node in &fleet.nodes {
            node.router
                .subscribe_to_global_message("type", "TUNNEL")
                .await
                .expect("subscribed");
        }
        let client = fleet.node(0).connect("device-1");

        fleet.hub.fail();
        tokio::time::sleep(Duration::from_secs(1)).await;
        fleet.hub.restore();
        tokio::time::sleep(Duration::from_secs(5)).await;

        fleet
            .node(0)
            .transport
            .deliver(&client, br#"{"type":"TUNNEL","n":1}"#.to_vec());
        fleet.settle().await;

        assert_eq!(global_messages(fleet.node(1)).await.len(), 1);
        fleet.shutdown();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_global_message_surfaces_message_field() {
    run_local(async {
        let fleet = Fleet::start(2, test_config()).await;
        fleet
            .node(1)
            .router
            .subscribe_to_global_message("type", "TUNNEL")
            .await
            .expect("subscribed");
        fleet
            .node(0)
            .router
            .subscribe_to_global_message("type", "TUNNEL")
            .await
            .expect("subscribed");
        let client = fleet.node(0).connect("device-1");

        let raw = br#"{"type":"TUNNEL","message":{"cmd":"open"}}"#.to_vec();
        fleet.node(0).transport.deliver(&client, raw.clone());
        fleet.settle().await;

        let received = global_events(fleet.node(1)).await;
        assert_eq!(
            received,
            vec![("TUNNEL".to_string(), Some(json!({"cmd": "open"})), raw)]
        );
        fleet.shutdown();
    })
    .await;
}
