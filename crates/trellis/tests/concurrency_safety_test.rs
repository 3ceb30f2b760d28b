//! Subscribe and unsubscribe racing on one node

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use trellis::prelude::*;

const INPUTS_PREFIX: &str = "trellis.subscriptionInputs.";
const LOGS_PREFIX: &str = "trellis.subscriberRegistry.";

/// Last key segment, the encoded subscription id.
fn id_segment(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

/// Input records whose subscription has no existence record.
async fn orphaned_inputs(store: &MemoryStore) -> Vec<String> {
    // One scan covers both prefixes under a single read.
    let entries = store.get_matches("trellis.s").await.unwrap();
    let logged: BTreeSet<&str> = entries
        .iter()
        .filter(|entry| entry.key.starts_with(LOGS_PREFIX))
        .map(|entry| id_segment(&entry.key))
        .collect();
    entries
        .iter()
        .filter(|entry| entry.key.starts_with(INPUTS_PREFIX))
        .filter(|entry| !logged.contains(id_segment(&entry.key)))
        .map(|entry| entry.key.clone())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inputs_never_outlive_their_subscription() {
    let store = Arc::new(MemoryStore::new());
    let node = Arc::new(TrellisNode::new(NodeConfig::new("N1"), store.clone()).unwrap());
    node.add_resource(&ResourceDescriptor::new("dev1", "Light", ["Power"]))
        .await
        .unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let mut writers = Vec::new();
    for selection in [
        r#"type="Light" and interface="Power""#,
        r#"id="dev1" or group="Kitchen""#,
    ] {
        let node = node.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..200 {
                node.subscribe("s1", selection, "state").await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    {
        let node = node.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..200 {
                node.unsubscribe_all("s1").await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let checker = {
        let store = store.clone();
        let done = done.clone();
        tokio::spawn(async move {
            loop {
                let finished = done.load(Ordering::Acquire);
                let orphans = orphaned_inputs(&store).await;
                assert!(orphans.is_empty(), "orphaned inputs: {orphans:?}");
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    done.store(true, Ordering::Release);
    checker.await.unwrap();

    node.unsubscribe_all("s1").await.unwrap();
    assert!(store.get_matches("trellis.s").await.unwrap().is_empty());
    assert!(node.get_subscribers("dev1", "state").await.unwrap().is_empty());
}
