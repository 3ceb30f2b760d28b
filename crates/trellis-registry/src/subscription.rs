//! Subscriptions and the in-memory table that indexes them by input key

use crate::graph::{SelectionGraph, VertexId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A standing registration of one subscriber for one selection and event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub subscriber_id: String,
    pub graph: SelectionGraph,
    pub event: String,
    /// Match every event starting with `event` instead of `event` only
    pub match_prefix: bool,
}

impl Subscription {
    pub fn matches_event(&self, event: &str) -> bool {
        event_matches(&self.event, self.match_prefix, event)
    }
}

pub(crate) fn event_matches(subscribed: &str, match_prefix: bool, event: &str) -> bool {
    if match_prefix {
        event.starts_with(subscribed)
    } else {
        subscribed == event
    }
}

/// Subscriptions by id, by subscriber, and by input key
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subscriptions: HashMap<String, Subscription>,
    by_subscriber: HashMap<String, BTreeSet<String>>,
    /// input key -> subscription id -> parent vertex per source on that key
    inputs: HashMap<String, HashMap<String, Vec<Option<VertexId>>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Returns false if the id is already taken.
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.subscriptions.contains_key(&subscription.id) {
            return false;
        }

        self.by_subscriber
            .entry(subscription.subscriber_id.clone())
            .or_default()
            .insert(subscription.id.clone());
        for (input_key, parent) in subscription.graph.input_edges() {
            self.inputs
                .entry(input_key)
                .or_default()
                .entry(subscription.id.clone())
                .or_default()
                .push(parent);
        }
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
        true
    }

    /// Remove a subscription owned by `subscriber_id`; `None` if there is no
    /// such subscription for that subscriber.
    pub fn remove(&mut self, subscriber_id: &str, subscription_id: &str) -> Option<Subscription> {
        match self.subscriptions.get(subscription_id) {
            Some(subscription) if subscription.subscriber_id == subscriber_id => {}
            _ => return None,
        }
        let subscription = self.subscriptions.remove(subscription_id)?;

        if let Some(ids) = self.by_subscriber.get_mut(subscriber_id) {
            ids.remove(subscription_id);
            if ids.is_empty() {
                self.by_subscriber.remove(subscriber_id);
            }
        }

        for input_key in subscription.graph.input_keys() {
            if let Some(subscribers) = self.inputs.get_mut(&input_key) {
                subscribers.remove(subscription_id);
                if subscribers.is_empty() {
                    self.inputs.remove(&input_key);
                }
            }
        }
        Some(subscription)
    }

    /// Remove every subscription of `subscriber_id`.
    pub fn remove_subscriber(&mut self, subscriber_id: &str) -> Vec<Subscription> {
        self.subscription_ids(subscriber_id)
            .into_iter()
            .filter_map(|id| self.remove(subscriber_id, &id))
            .collect()
    }

    pub fn get(&self, subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions.get(subscription_id)
    }

    pub fn subscription_ids(&self, subscriber_id: &str) -> Vec<String> {
        self.by_subscriber
            .get(subscriber_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscriptions that fire for `event` when `input_keys` are the inputs
    /// of the resource in question. Repeated keys count once.
    pub fn match_inputs(&self, input_keys: &[String], event: &str) -> Vec<&Subscription> {
        let distinct: BTreeSet<&String> = input_keys.iter().collect();
        let mut fired: BTreeMap<&str, Vec<Option<VertexId>>> = BTreeMap::new();

        for input_key in distinct {
            let Some(subscribers) = self.inputs.get(input_key) else {
                continue;
            };
            for (subscription_id, parents) in subscribers {
                let Some(subscription) = self.subscriptions.get(subscription_id) else {
                    continue;
                };
                if subscription.matches_event(event) {
                    fired
                        .entry(subscription_id.as_str())
                        .or_default()
                        .extend(parents.iter().copied());
                }
            }
        }

        fired
            .into_iter()
            .filter_map(|(subscription_id, parents)| {
                let subscription = self.subscriptions.get(subscription_id)?;
                subscription.graph.fires(parents).then_some(subscription)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of distinct input keys with at least one subscription.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.by_subscriber.clear();
        self.inputs.clear();
    }
}
