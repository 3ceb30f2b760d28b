//! Subscription registry replicated through the shared store
//!
//! Every subscription is persisted as one log record (its existence) plus one
//! input record per distinct input key. Input records are only ever
//! observable together with their log record:
//! - subscribe writes the log batch, then the input batch
//! - unsubscribe deletes the input batch, then the log batch
//!
//! Both run under the subscription's stripe lock, so two operations on the
//! same id never interleave. A crash or store failure part-way leaves a log
//! record without (all) inputs, which a later unsubscribe cleans up.

use crate::graph::{SelectionGraph, VertexId};
use crate::local::SubscriberRegistry;
use crate::subscription::{event_matches, Subscription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trellis_core::{
    keys, observe, BatchOp, Context, LockManager, Predicate, RegistryConfig, Result,
    SharedStore, TrellisError, TtlCache,
};
use trellis_index::ResourceIndex;

/// Liveness of other servers, supplied by the routing layer
pub trait Reachability: Send + Sync {
    fn is_reachable(&self, server_id: &str) -> bool;
}

impl<F> Reachability for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_reachable(&self, server_id: &str) -> bool {
        self(server_id)
    }
}

/// Key of a cached `get_remote_subscribers` answer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteCacheKey {
    pub resource_id: String,
    pub event: String,
}

/// Value of a subscription's log record
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogRecord {
    graph: SelectionGraph,
    event: String,
    prefix: bool,
}

/// Value of one input record: the owning server and the parent vertex of
/// each source listening on this input key
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputRecord {
    server_id: String,
    parents: Vec<Option<VertexId>>,
}

/// Newest readable sibling.
fn last_readable<T: DeserializeOwned>(key: &str, siblings: &[String]) -> Option<T> {
    let parsed = siblings
        .iter()
        .rev()
        .find_map(|sibling| serde_json::from_str(sibling).ok());
    if parsed.is_none() {
        tracing::warn!(key, "No readable sibling");
    }
    parsed
}

pub struct ReplicatedSubscriberRegistry {
    server_id: String,
    local: SubscriberRegistry,
    store: Arc<dyn SharedStore>,
    locks: LockManager,
    remote_cache: TtlCache<RemoteCacheKey, BTreeSet<String>>,
}

impl ReplicatedSubscriberRegistry {
    pub fn new(
        config: &RegistryConfig,
        index: Arc<dyn ResourceIndex>,
        store: Arc<dyn SharedStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            server_id: config.server_id.clone(),
            local: SubscriberRegistry::new(index),
            store,
            locks: LockManager::new(
                config.lock_stripes,
                Duration::from_millis(config.lock_timeout_ms),
            ),
            remote_cache: TtlCache::new("remote_subscribers", &config.remote_cache),
        })
    }

    /// Replace the remote-subscriber cache with one expiring after `ttl`.
    pub fn with_remote_cache_ttl(mut self, config: &RegistryConfig, ttl: Duration) -> Self {
        self.remote_cache = TtlCache::with_ttl("remote_subscribers", &config.remote_cache, ttl);
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The in-memory registry holding this server's subscriptions.
    pub fn local(&self) -> &SubscriberRegistry {
        &self.local
    }

    /// Register locally, then persist log and input records.
    ///
    /// Parse and compile errors leave no trace. Once the subscription is
    /// registered, a store failure is reported as `IncompleteSubscribe`
    /// carrying the id; the subscription stays registered and can be removed
    /// with `unsubscribe`.
    pub async fn subscribe(
        &self,
        subscriber_id: &str,
        selection: &str,
        event: &str,
        match_prefix: bool,
    ) -> Result<String> {
        let subscription =
            SubscriberRegistry::prepare(subscriber_id, selection, event, match_prefix)?;
        let id = subscription.id.clone();
        let log_op = self.log_put(&subscription)?;
        let input_ops = self.input_puts(&subscription)?;

        let _guard = self.locks.acquire(&id).await?;
        self.local.insert(subscription);

        let persisted = async {
            self.write_batch(vec![log_op]).await?;
            self.write_batch(input_ops).await
        }
        .await;

        match persisted {
            Ok(()) => {
                observe::record_subscribe(true);
                Ok(id)
            }
            Err(source) => {
                tracing::warn!(subscription = %id, "Subscription not fully persisted: {}", source);
                observe::record_subscribe(false);
                Err(TrellisError::IncompleteSubscribe {
                    subscription_id: id,
                    source: Box::new(source),
                })
            }
        }
    }

    pub async fn subscribe_all(
        &self,
        subscriber_id: &str,
        selection: &str,
        prefix: &str,
    ) -> Result<String> {
        self.subscribe(subscriber_id, selection, prefix, true).await
    }

    /// Delete input records, then the log record, then forget the
    /// subscription locally. `None` if the subscriber holds no such
    /// subscription.
    ///
    /// If a store write fails the subscription stays registered and
    /// matchable; retrying is safe.
    pub async fn unsubscribe(
        &self,
        subscriber_id: &str,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let _guard = self.locks.acquire(subscription_id).await?;
        let Some(subscription) = self
            .local
            .subscription(subscription_id)
            .filter(|s| s.subscriber_id == subscriber_id)
        else {
            return Ok(None);
        };

        let (log_ops, input_ops) = self.delete_ops(std::slice::from_ref(&subscription));
        if let Err(e) = self.delete_records(log_ops, input_ops).await {
            observe::record_unsubscribe(false);
            return Err(e);
        }

        let removed = self.local.unsubscribe(subscriber_id, subscription_id);
        Ok(removed)
    }

    /// Remove every subscription of `subscriber_id` with one input batch and
    /// one log batch, holding all of their locks.
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> Result<Vec<Subscription>> {
        let ids = self.local.subscription_ids(subscriber_id);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.locks.acquire_keys(&ids).await?;
        let subscriptions: Vec<Subscription> = ids
            .iter()
            .filter_map(|id| self.local.subscription(id))
            .filter(|s| s.subscriber_id == subscriber_id)
            .collect();

        let (log_ops, input_ops) = self.delete_ops(&subscriptions);
        if let Err(e) = self.delete_records(log_ops, input_ops).await {
            observe::record_unsubscribe(false);
            return Err(e);
        }

        Ok(subscriptions
            .iter()
            .filter_map(|s| self.local.unsubscribe(subscriber_id, &s.id))
            .collect())
    }

    /// Subscribers on this server for `event` on `resource_id`.
    pub async fn get_subscribers(&self, resource_id: &str, event: &str) -> Result<BTreeSet<String>> {
        self.local.get_subscribers(resource_id, event).await
    }

    pub async fn is_in_selection(&self, resource_id: &str, predicate: &Predicate) -> Result<bool> {
        self.local.is_in_selection(resource_id, predicate).await
    }

    /// Other servers holding a subscription that fires for `event` on
    /// `resource_id`.
    ///
    /// Answers are cached per `(resource, event)` and only expire; they may
    /// be stale for up to one cache TTL.
    pub async fn get_remote_subscribers(
        &self,
        resource_id: &str,
        event: &str,
    ) -> Result<BTreeSet<String>> {
        let cache_key = RemoteCacheKey {
            resource_id: resource_id.to_string(),
            event: event.to_string(),
        };
        if let Some(servers) = self.remote_cache.get(&cache_key) {
            return Ok(servers);
        }

        let mut inputs = self.local.get_inputs(resource_id).await?;
        inputs.sort();
        inputs.dedup();

        let scans = futures::future::try_join_all(inputs.iter().map(|input| async move {
            let prefix = keys::subscription::input_prefix(input);
            self.store.get_matches(&prefix).await
        }))
        .await?;

        // (server, subscription) -> parents of every source that fired
        let mut fired: BTreeMap<(String, String), Vec<Option<VertexId>>> = BTreeMap::new();
        for entry in scans.into_iter().flatten() {
            let subscription_id = match keys::subscription::subscription_id_from_key(&entry.key) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping input record: {}", e);
                    continue;
                }
            };
            let Some(record) = last_readable::<InputRecord>(&entry.key, &entry.value.siblings)
            else {
                continue;
            };
            if record.server_id == self.server_id {
                continue;
            }
            fired
                .entry((record.server_id, subscription_id))
                .or_default()
                .extend(record.parents);
        }

        let mut servers = BTreeSet::new();
        if !fired.is_empty() {
            let log_keys: Vec<String> = fired
                .keys()
                .map(|(server_id, subscription_id)| {
                    keys::subscription::log(server_id, subscription_id)
                })
                .collect();
            let logs = self.store.get(&log_keys).await?;

            for (((server_id, _), parents), (key, log)) in
                fired.into_iter().zip(log_keys.iter().zip(logs))
            {
                // Inputs without a log record do not count.
                let Some(log) =
                    log.and_then(|value| last_readable::<LogRecord>(key, &value.siblings))
                else {
                    continue;
                };
                if event_matches(&log.event, log.prefix, event) && log.graph.fires(parents) {
                    servers.insert(server_id);
                }
            }
        }

        self.remote_cache.insert(cache_key, servers.clone());
        Ok(servers)
    }

    /// `get_remote_subscribers` without the servers `reachability` reports
    /// as down.
    pub async fn get_reachable_remote_subscribers(
        &self,
        resource_id: &str,
        event: &str,
        reachability: &dyn Reachability,
    ) -> Result<BTreeSet<String>> {
        let mut servers = self.get_remote_subscribers(resource_id, event).await?;
        servers.retain(|server_id| reachability.is_reachable(server_id));
        Ok(servers)
    }

    fn log_put(&self, subscription: &Subscription) -> Result<BatchOp> {
        let record = LogRecord {
            graph: subscription.graph.clone(),
            event: subscription.event.clone(),
            prefix: subscription.match_prefix,
        };
        Ok(BatchOp::put(
            keys::subscription::log(&self.server_id, &subscription.id),
            serde_json::to_string(&record)?,
            Context::empty(),
        ))
    }

    fn input_puts(&self, subscription: &Subscription) -> Result<Vec<BatchOp>> {
        let mut by_key: BTreeMap<String, Vec<Option<VertexId>>> = BTreeMap::new();
        for (input_key, parent) in subscription.graph.input_edges() {
            by_key.entry(input_key).or_default().push(parent);
        }

        by_key
            .into_iter()
            .map(|(input_key, parents)| {
                let record = InputRecord {
                    server_id: self.server_id.clone(),
                    parents,
                };
                Ok(BatchOp::put(
                    keys::subscription::input(&input_key, &subscription.id),
                    serde_json::to_string(&record)?,
                    Context::empty(),
                ))
            })
            .collect()
    }

    fn delete_ops(&self, subscriptions: &[Subscription]) -> (Vec<BatchOp>, Vec<BatchOp>) {
        let mut log_ops = Vec::with_capacity(subscriptions.len());
        let mut input_ops = Vec::new();
        for subscription in subscriptions {
            log_ops.push(BatchOp::delete(keys::subscription::log(
                &self.server_id,
                &subscription.id,
            )));
            for input_key in subscription.graph.input_keys() {
                input_ops.push(BatchOp::delete(keys::subscription::input(
                    &input_key,
                    &subscription.id,
                )));
            }
        }
        (log_ops, input_ops)
    }

    async fn delete_records(&self, log_ops: Vec<BatchOp>, input_ops: Vec<BatchOp>) -> Result<()> {
        self.write_batch(input_ops).await?;
        self.write_batch(log_ops).await
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.store.batch(ops).await;
        observe::record_store_batch(started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(server = %self.server_id, "Registry batch failed: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{CacheConfig, ResourceDescriptor};
    use trellis_index::LocalResourceIndex;
    use trellis_memstore::MemoryStore;

    struct Cluster {
        store: Arc<MemoryStore>,
        index: Arc<LocalResourceIndex>,
    }

    impl Cluster {
        async fn new() -> Self {
            let index = Arc::new(LocalResourceIndex::new());
            index
                .add_resource(&ResourceDescriptor::new("dev1", "Light", ["Power"]))
                .await
                .unwrap();
            index.join_group("dev1", "A/B").await.unwrap();
            Self {
                store: Arc::new(MemoryStore::new()),
                index,
            }
        }

        fn node(&self, server_id: &str) -> ReplicatedSubscriberRegistry {
            let config = RegistryConfig::new(server_id);
            ReplicatedSubscriberRegistry::new(&config, self.index.clone(), self.store.clone())
                .unwrap()
        }

        fn uncached_node(&self, server_id: &str) -> ReplicatedSubscriberRegistry {
            let config = RegistryConfig::new(server_id).with_remote_cache(CacheConfig::disabled());
            ReplicatedSubscriberRegistry::new(&config, self.index.clone(), self.store.clone())
                .unwrap()
        }

        async fn keys_under(&self, prefix: &str) -> Vec<String> {
            self.store
                .get_matches(prefix)
                .await
                .unwrap()
                .into_iter()
                .map(|entry| entry.key)
                .collect()
        }

        async fn log_keys(&self) -> Vec<String> {
            self.keys_under(&format!("{}.", keys::SUBSCRIBER_REGISTRY_PREFIX))
                .await
        }

        async fn input_keys(&self) -> Vec<String> {
            self.keys_under(&format!("{}.", keys::SUBSCRIPTION_INPUTS_PREFIX))
                .await
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_persists_log_then_inputs() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");

        let id = node
            .subscribe("s1", r#"type="Light" and group="A""#, "state-power", false)
            .await
            .unwrap();

        assert_eq!(cluster.log_keys().await, vec![keys::subscription::log("N1", &id)]);
        assert_eq!(cluster.input_keys().await.len(), 2);
        assert_eq!(cluster.store.batch_count(), 2);

        let log = cluster
            .store
            .get_one(&keys::subscription::log("N1", &id))
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&log.siblings[0]).unwrap();
        assert_eq!(value["event"], "state-power");
        assert_eq!(value["prefix"], false);
        assert!(value["graph"]["logic"]["0"].is_object());
    }

    #[tokio::test]
    async fn test_failed_log_write_is_incomplete_and_cleanable() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");
        cluster.store.fail_batch_after(0);

        let err = node
            .subscribe("s1", r#"id="dev1""#, "motion", false)
            .await
            .unwrap_err();
        let TrellisError::IncompleteSubscribe { subscription_id, .. } = err else {
            panic!("expected IncompleteSubscribe, got {err:?}");
        };
        assert!(cluster.log_keys().await.is_empty());
        assert!(cluster.input_keys().await.is_empty());

        assert!(node.unsubscribe("s1", &subscription_id).await.unwrap().is_some());
        assert!(node.local().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_deletes_everything() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");
        let id = node
            .subscribe("s1", r#"type="Light" or id="x""#, "e", false)
            .await
            .unwrap();

        assert!(node.unsubscribe("other", &id).await.unwrap().is_none());
        assert!(node.unsubscribe("s1", &id).await.unwrap().is_some());
        assert!(node.unsubscribe("s1", &id).await.unwrap().is_none());
        assert!(cluster.log_keys().await.is_empty());
        assert!(cluster.input_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_unsubscribe_keeps_subscription() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");
        let id = node.subscribe("s1", r#"id="dev1""#, "e", false).await.unwrap();

        // Input deletes succeed, log delete fails.
        cluster.store.fail_batch_after(1);
        assert!(node.unsubscribe("s1", &id).await.is_err());

        assert_eq!(cluster.log_keys().await.len(), 1);
        assert!(cluster.input_keys().await.is_empty());
        assert_eq!(node.get_subscribers("dev1", "e").await.unwrap(), set(&["s1"]));

        assert!(node.unsubscribe("s1", &id).await.unwrap().is_some());
        assert!(cluster.log_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_uses_one_batch_per_phase() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");
        node.subscribe("s1", "id=*", "e", false).await.unwrap();
        node.subscribe_all("s1", r#"type="Light""#, "state-").await.unwrap();
        node.subscribe("s2", "id=*", "e", false).await.unwrap();
        let before = cluster.store.batch_count();

        let removed = node.unsubscribe_all("s1").await.unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(cluster.store.batch_count(), before + 2);
        assert_eq!(cluster.log_keys().await.len(), 1);
        assert_eq!(node.get_subscribers("dev1", "e").await.unwrap(), set(&["s2"]));
        assert!(node.unsubscribe_all("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_subscribers_exclude_own_server() {
        let cluster = Cluster::new().await;
        let n1 = cluster.uncached_node("N1");
        let n2 = cluster.node("N2");

        n1.subscribe("s1", r#"id="dev1""#, "motion", false).await.unwrap();
        let id = n2.subscribe("s2", r#"id="dev1""#, "motion", false).await.unwrap();

        assert_eq!(
            n1.get_remote_subscribers("dev1", "motion").await.unwrap(),
            set(&["N2"])
        );
        assert!(n1
            .get_remote_subscribers("dev1", "other")
            .await
            .unwrap()
            .is_empty());

        n2.unsubscribe("s2", &id).await.unwrap();
        assert!(n1
            .get_remote_subscribers("dev1", "motion")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remote_cache_serves_stale_until_expiry() {
        let cluster = Cluster::new().await;
        let config = RegistryConfig::new("N1");
        let n1 = ReplicatedSubscriberRegistry::new(&config, cluster.index.clone(), cluster.store.clone())
            .unwrap()
            .with_remote_cache_ttl(&config, Duration::from_millis(50));
        let n2 = cluster.node("N2");

        let id = n2.subscribe("s2", "type=*", "e", false).await.unwrap();
        assert_eq!(n1.get_remote_subscribers("dev1", "e").await.unwrap(), set(&["N2"]));

        n2.unsubscribe("s2", &id).await.unwrap();
        assert_eq!(n1.get_remote_subscribers("dev1", "e").await.unwrap(), set(&["N2"]));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(n1.get_remote_subscribers("dev1", "e").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_and_with_repeated_leaf_and_prefix() {
        let cluster = Cluster::new().await;
        let n1 = cluster.uncached_node("N1");
        let n2 = cluster.node("N2");

        n2.subscribe("s", r#"group="A" and group="A""#, "e", false)
            .await
            .unwrap();
        n2.subscribe_all("s", r#"interface="Power" and type="Other""#, "state-")
            .await
            .unwrap();

        assert_eq!(n1.get_remote_subscribers("dev1", "e").await.unwrap(), set(&["N2"]));
        assert!(n1
            .get_remote_subscribers("dev1", "state-power")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_inputs_without_log_are_ignored() {
        let cluster = Cluster::new().await;
        let n1 = cluster.uncached_node("N1");
        let record = serde_json::to_string(&InputRecord {
            server_id: "N3".into(),
            parents: vec![None],
        })
        .unwrap();
        cluster
            .store
            .put(
                &keys::subscription::input(r#"id="dev1""#, "orphan"),
                &record,
                &Context::empty(),
            )
            .await
            .unwrap();

        assert!(n1.get_remote_subscribers("dev1", "e").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reachability_filter() {
        let cluster = Cluster::new().await;
        let n1 = cluster.uncached_node("N1");
        cluster.node("N2").subscribe("s", "id=*", "e", false).await.unwrap();
        cluster.node("N3").subscribe("s", "id=*", "e", false).await.unwrap();

        let reachable = |server_id: &str| server_id != "N3";
        assert_eq!(
            n1.get_reachable_remote_subscribers("dev1", "e", &reachable)
                .await
                .unwrap(),
            set(&["N2"])
        );
    }

    #[tokio::test]
    async fn test_bad_selection_touches_nothing() {
        let cluster = Cluster::new().await;
        let node = cluster.node("N1");
        assert!(node.subscribe("s1", r#"not id="x""#, "e", false).await.is_err());
        assert!(node.local().is_empty());
        assert_eq!(cluster.store.batch_count(), 0);
    }
}
