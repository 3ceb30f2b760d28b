//! Subscription registry for one process

use crate::graph::SelectionGraph;
use crate::selector;
use crate::subscription::{Subscription, SubscriptionTable};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use trellis_core::{observe, parse, Dimension, Leaf, Predicate, Result};
use trellis_index::ResourceIndex;

fn new_subscription_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Owns live subscriptions and answers which subscribers want an event from
/// a resource.
///
/// The table is only touched under a short synchronous lock; index lookups
/// happen outside it.
pub struct SubscriberRegistry {
    index: Arc<dyn ResourceIndex>,
    table: Mutex<SubscriptionTable>,
}

impl SubscriberRegistry {
    pub fn new(index: Arc<dyn ResourceIndex>) -> Self {
        Self {
            index,
            table: Mutex::new(SubscriptionTable::new()),
        }
    }

    pub fn index(&self) -> &Arc<dyn ResourceIndex> {
        &self.index
    }

    /// Subscribe `subscriber_id` to `event` (or every event starting with it)
    /// on the resources `selection` matches. Returns the subscription id.
    ///
    /// Fails before touching any state if the selection does not parse or
    /// contains a negation.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        selection: &str,
        event: &str,
        match_prefix: bool,
    ) -> Result<String> {
        let subscription = Self::prepare(subscriber_id, selection, event, match_prefix)?;
        let id = subscription.id.clone();
        self.insert(subscription);
        observe::record_subscribe(true);
        Ok(id)
    }

    /// Parse, compile and assign an id without registering anything.
    pub(crate) fn prepare(
        subscriber_id: &str,
        selection: &str,
        event: &str,
        match_prefix: bool,
    ) -> Result<Subscription> {
        let graph = SelectionGraph::compile(&parse(selection)?)?;
        Ok(Subscription {
            id: new_subscription_id(),
            subscriber_id: subscriber_id.to_string(),
            graph,
            event: event.to_string(),
            match_prefix,
        })
    }

    /// Subscribe to every event whose name starts with `prefix`.
    pub fn subscribe_all(&self, subscriber_id: &str, selection: &str, prefix: &str) -> Result<String> {
        self.subscribe(subscriber_id, selection, prefix, true)
    }

    /// `None` if the subscriber holds no such subscription.
    pub fn unsubscribe(&self, subscriber_id: &str, subscription_id: &str) -> Option<Subscription> {
        let removed = self.table.lock().remove(subscriber_id, subscription_id);
        if removed.is_some() {
            tracing::debug!(subscriber = subscriber_id, subscription = subscription_id, "Unsubscribed");
            observe::record_unsubscribe(true);
        }
        removed
    }

    pub fn unsubscribe_all(&self, subscriber_id: &str) -> Vec<Subscription> {
        let removed = self.table.lock().remove_subscriber(subscriber_id);
        tracing::debug!(subscriber = subscriber_id, count = removed.len(), "Unsubscribed all");
        removed
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.table.lock().get(subscription_id).cloned()
    }

    pub fn subscription_ids(&self, subscriber_id: &str) -> Vec<String> {
        self.table.lock().subscription_ids(subscriber_id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Input keys a resource currently produces.
    ///
    /// `id="<id>"` and `id=*` always; for a resource the index knows, also
    /// its type, each interface, `type=*`, `interface=*`, and when it is in
    /// any group `group=*` plus every joined path and all of their ancestors.
    pub async fn get_inputs(&self, resource_id: &str) -> Result<Vec<String>> {
        let mut inputs = vec![
            Leaf::exact(Dimension::Id, resource_id).input_key(),
            Leaf::any(Dimension::Id).input_key(),
        ];

        let Some(properties) = self.index.get_resource_properties(resource_id).await? else {
            return Ok(inputs);
        };

        inputs.push(Leaf::exact(Dimension::Type, properties.resource_type.as_str()).input_key());
        inputs.push(Leaf::any(Dimension::Type).input_key());
        for interface in &properties.interfaces {
            inputs.push(Leaf::exact(Dimension::Interface, interface.as_str()).input_key());
        }
        inputs.push(Leaf::any(Dimension::Interface).input_key());

        let groups = properties.expanded_groups();
        if !groups.is_empty() {
            inputs.push(Leaf::any(Dimension::Group).input_key());
            for group in groups {
                inputs.push(Leaf::exact(Dimension::Group, group).input_key());
            }
        }
        Ok(inputs)
    }

    /// Subscriber ids with a subscription that fires for `event` on
    /// `resource_id`.
    pub async fn get_subscribers(&self, resource_id: &str, event: &str) -> Result<BTreeSet<String>> {
        let inputs = self.get_inputs(resource_id).await?;
        let started = Instant::now();
        let (subscribers, matched) = {
            let table = self.table.lock();
            let matched = table.match_inputs(&inputs, event);
            let subscribers: BTreeSet<String> =
                matched.iter().map(|s| s.subscriber_id.clone()).collect();
            (subscribers, matched.len())
        };
        observe::record_match(started.elapsed(), matched);
        Ok(subscribers)
    }

    /// Full, non-incremental evaluation of `predicate` for one resource.
    pub async fn is_in_selection(&self, resource_id: &str, predicate: &Predicate) -> Result<bool> {
        selector::is_in_selection(self.index.as_ref(), resource_id, predicate).await
    }

    /// Register a prebuilt subscription; false if its id is taken.
    pub(crate) fn insert(&self, subscription: Subscription) -> bool {
        let subscriber = subscription.subscriber_id.clone();
        let id = subscription.id.clone();
        let inserted = self.table.lock().insert(subscription);
        if inserted {
            tracing::debug!(subscriber = %subscriber, subscription = %id, "Subscribed");
        }
        inserted
    }

    pub(crate) fn clear(&self) {
        self.table.lock().clear();
    }
}
