//! Store failures between the two phases of subscribe and unsubscribe

use trellis::prelude::*;

const INPUTS_PREFIX: &str = "trellis.subscriptionInputs.";
const LOGS_PREFIX: &str = "trellis.subscriberRegistry.";

async fn count(store: &MemoryStore, prefix: &str) -> usize {
    store.get_matches(prefix).await.unwrap().len()
}

async fn node_with_light() -> (TrellisNode, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let node = TrellisNode::new(NodeConfig::new("N1"), store.clone()).unwrap();
    node.add_resource(&ResourceDescriptor::new("dev1", "Light", ["Power"]))
        .await
        .unwrap();
    (node, store)
}

#[tokio::test]
async fn test_interrupted_subscribe_then_unsubscribe_leaves_nothing() {
    let (node, store) = node_with_light().await;

    // Log batch succeeds, input batch fails.
    store.fail_batch_after(1);
    let err = node
        .subscribe("s1", r#"type="Light" and interface="Power""#, "e")
        .await
        .unwrap_err();
    let TrellisError::IncompleteSubscribe { subscription_id, .. } = err else {
        panic!("expected IncompleteSubscribe, got {err:?}");
    };
    assert_eq!(count(&store, LOGS_PREFIX).await, 1);
    assert_eq!(count(&store, INPUTS_PREFIX).await, 0);

    assert!(node
        .unsubscribe("s1", &subscription_id)
        .await
        .unwrap()
        .is_some());
    assert_eq!(count(&store, LOGS_PREFIX).await, 0);
    assert_eq!(count(&store, INPUTS_PREFIX).await, 0);
}

#[tokio::test]
async fn test_interrupted_unsubscribe_keeps_subscription_matchable() {
    let (node, store) = node_with_light().await;
    let id = node.subscribe("s1", r#"type="Light""#, "e").await.unwrap();

    // Input deletes succeed, log delete fails.
    store.fail_batch_after(1);
    let err = node.unsubscribe("s1", &id).await.unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(count(&store, LOGS_PREFIX).await, 1);
    assert_eq!(count(&store, INPUTS_PREFIX).await, 0);
    assert!(node
        .get_subscribers("dev1", "e")
        .await
        .unwrap()
        .contains("s1"));

    node.unsubscribe("s1", &id).await.unwrap();
    assert_eq!(count(&store, LOGS_PREFIX).await, 0);
    assert!(node.get_subscribers("dev1", "e").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inputs_never_outlive_their_log() {
    let (node, store) = node_with_light().await;
    let ids = [
        node.subscribe("s1", "type=*", "e").await.unwrap(),
        node.subscribe("s1", r#"interface="Power""#, "e").await.unwrap(),
    ];

    store.fail_batch_after(0);
    assert!(node.unsubscribe_all("s1").await.is_err());
    assert_eq!(count(&store, LOGS_PREFIX).await, 2);
    assert_eq!(count(&store, INPUTS_PREFIX).await, 2);

    let removed = node.unsubscribe_all("s1").await.unwrap();
    assert_eq!(removed.len(), ids.len());
    assert_eq!(count(&store, LOGS_PREFIX).await, 0);
    assert_eq!(count(&store, INPUTS_PREFIX).await, 0);
}
