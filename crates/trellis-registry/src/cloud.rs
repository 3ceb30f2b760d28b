//! Registry for subscriptions forwarded from the cloud
//!
//! The cloud compiles selections itself and pushes the graphs here under its
//! own subscription ids. All of them belong to one fixed subscriber.

use crate::graph::SelectionGraph;
use crate::local::SubscriberRegistry;
use crate::subscription::Subscription;
use std::collections::BTreeSet;
use std::sync::Arc;
use trellis_core::Result;
use trellis_index::ResourceIndex;

/// Subscriber id that owns every cloud subscription
pub const CLOUD_SUBSCRIBER: &str = "cloud";

pub struct CloudSubscriberRegistry {
    registry: SubscriberRegistry,
}

impl CloudSubscriberRegistry {
    pub fn new(index: Arc<dyn ResourceIndex>) -> Self {
        Self {
            registry: SubscriberRegistry::new(index),
        }
    }

    /// Register a compiled graph under `subscription_id`.
    ///
    /// Re-subscribing an id that is already registered keeps the existing
    /// subscription.
    pub fn subscribe(
        &self,
        subscription_id: &str,
        graph: SelectionGraph,
        event: &str,
        match_prefix: bool,
    ) -> String {
        let inserted = self.registry.insert(Subscription {
            id: subscription_id.to_string(),
            subscriber_id: CLOUD_SUBSCRIBER.to_string(),
            graph,
            event: event.to_string(),
            match_prefix,
        });
        if !inserted {
            tracing::trace!(subscription = subscription_id, "Cloud subscription already present");
        }
        subscription_id.to_string()
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Option<Subscription> {
        self.registry.unsubscribe(CLOUD_SUBSCRIBER, subscription_id)
    }

    /// Drop every cloud subscription.
    pub fn gc(&self) {
        let dropped = self.registry.len();
        self.registry.clear();
        tracing::debug!(dropped, "Cleared cloud subscriptions");
    }

    /// Whether any cloud subscription fires for `event` on `resource_id`.
    pub async fn cloud_needs_event(&self, resource_id: &str, event: &str) -> Result<bool> {
        Ok(self
            .get_subscribers(resource_id, event)
            .await?
            .contains(CLOUD_SUBSCRIBER))
    }

    pub async fn get_subscribers(&self, resource_id: &str, event: &str) -> Result<BTreeSet<String>> {
        self.registry.get_subscribers(resource_id, event).await
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.registry.subscription_ids(CLOUD_SUBSCRIBER)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
