//! One server's view of the fabric
//!
//! Bundles the replicated resource index, the replicated subscription
//! registry and a selector over the same shared store.

use crate::{
    Dimension, GroupNode, NodeConfig, Reachability, ReplicatedResourceIndex,
    ReplicatedSubscriberRegistry, ResourceDescriptor, ResourceIndex, ResourceProperties,
    ResourceSelector, ResourceSet, Result, SharedStore, Subscription,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Unified Trellis node
pub struct TrellisNode {
    config: NodeConfig,
    store: Arc<dyn SharedStore>,
    index: Arc<ReplicatedResourceIndex>,
    registry: ReplicatedSubscriberRegistry,
    selector: ResourceSelector,
}

impl TrellisNode {
    /// Open a node for `config.server_id` on top of `store`.
    pub fn new(config: NodeConfig, store: Arc<dyn SharedStore>) -> Result<Self> {
        let index = Arc::new(ReplicatedResourceIndex::new(store.clone(), &config.index));
        let registry = ReplicatedSubscriberRegistry::new(
            &config.registry_config(),
            index.clone(),
            store.clone(),
        )?;
        let selector = ResourceSelector::new(index.clone());

        tracing::info!(server = %config.server_id, "Opened trellis node");
        Ok(Self {
            config,
            store,
            index,
            registry,
            selector,
        })
    }

    /// Expire remote-subscriber answers after `ttl` instead of the configured
    /// number of seconds.
    pub fn with_remote_cache_ttl(mut self, ttl: Duration) -> Self {
        let config = self.config.registry_config();
        self.registry = self.registry.with_remote_cache_ttl(&config, ttl);
        self
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<ReplicatedResourceIndex> {
        &self.index
    }

    pub fn registry(&self) -> &ReplicatedSubscriberRegistry {
        &self.registry
    }

    // Resources and groups

    pub async fn add_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        self.index.add_resource(resource).await
    }

    pub async fn remove_resource(&self, resource_id: &str) -> Result<()> {
        self.index.remove_resource(resource_id).await
    }

    pub async fn get_resources(
        &self,
        dimension: Dimension,
        value: Option<&str>,
    ) -> Result<ResourceSet> {
        self.index.get_resources(dimension, value).await
    }

    pub async fn get_resource_properties(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceProperties>> {
        self.index.get_resource_properties(resource_id).await
    }

    pub async fn create_group(&self, path: &str) -> Result<()> {
        self.index.create_group(path).await
    }

    pub async fn delete_group(&self, path: &str) -> Result<()> {
        self.index.delete_group(path).await
    }

    pub async fn join_group(&self, resource_id: &str, path: &str) -> Result<()> {
        self.index.join_group(resource_id, path).await
    }

    pub async fn leave_group(&self, resource_id: &str, path: &str) -> Result<()> {
        self.index.leave_group(resource_id, path).await
    }

    /// The hierarchy below `path`; `""` is the root.
    pub async fn get_group(&self, path: &str) -> Result<GroupNode> {
        self.index.hierarchy().get_group(path).await
    }

    /// Every resource in `path` or below it.
    pub async fn list_group(&self, path: &str) -> Result<ResourceSet> {
        self.index.hierarchy().list_group(path).await
    }

    // Subscriptions

    pub async fn subscribe(&self, subscriber_id: &str, selection: &str, event: &str) -> Result<String> {
        self.registry
            .subscribe(subscriber_id, selection, event, false)
            .await
    }

    pub async fn subscribe_all(
        &self,
        subscriber_id: &str,
        selection: &str,
        prefix: &str,
    ) -> Result<String> {
        self.registry
            .subscribe_all(subscriber_id, selection, prefix)
            .await
    }

    pub async fn unsubscribe(
        &self,
        subscriber_id: &str,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        self.registry.unsubscribe(subscriber_id, subscription_id).await
    }

    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> Result<Vec<Subscription>> {
        self.registry.unsubscribe_all(subscriber_id).await
    }

    /// Local subscribers for `event` on `resource_id`.
    pub async fn get_subscribers(&self, resource_id: &str, event: &str) -> Result<BTreeSet<String>> {
        self.registry.get_subscribers(resource_id, event).await
    }

    /// Other servers that want `event` on `resource_id`.
    pub async fn get_remote_subscribers(
        &self,
        resource_id: &str,
        event: &str,
    ) -> Result<BTreeSet<String>> {
        self.registry.get_remote_subscribers(resource_id, event).await
    }

    pub async fn get_reachable_remote_subscribers(
        &self,
        resource_id: &str,
        event: &str,
        reachability: &dyn Reachability,
    ) -> Result<BTreeSet<String>> {
        self.registry
            .get_reachable_remote_subscribers(resource_id, event, reachability)
            .await
    }

    /// Resources currently matching `selection`.
    pub async fn select(&self, selection: &str) -> Result<ResourceSet> {
        self.selector.select(selection).await
    }
}
