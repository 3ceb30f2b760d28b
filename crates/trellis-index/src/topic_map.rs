//! Wildcard topic trie
//!
//! Clients subscribe to slash-delimited topics in which a `+` segment matches
//! exactly one level and a trailing `#` matches any remainder, including
//! nothing. Publishing to a concrete topic yields every client whose
//! subscription matches it.
//!
//! The local resource index only subscribes concrete group paths; wildcard
//! subscriptions serve callers using the map directly.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use trellis_core::{Result, TrellisError};

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

#[derive(Debug, Default)]
struct TopicNode {
    children: HashMap<String, TopicNode>,
    clients: HashSet<String>,
}

impl TopicNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.clients.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TopicMap {
    root: TopicNode,
    client_topics: HashMap<String, HashSet<String>>,
}

fn parse_topic(topic: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = topic.split('/').collect();
    let last = segments.len() - 1;
    if segments
        .iter()
        .enumerate()
        .any(|(i, segment)| *segment == MULTI_LEVEL && i != last)
    {
        return Err(TrellisError::InvalidState(format!(
            "invalid topic string {}: '#' must be the last segment",
            topic
        )));
    }
    Ok(segments)
}

impl TopicMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&mut self, topic: &str, client_id: &str) -> Result<()> {
        let segments = parse_topic(topic)?;
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.clients.insert(client_id.to_string());

        self.client_topics
            .entry(client_id.to_string())
            .or_default()
            .insert(topic.to_string());
        Ok(())
    }

    pub fn remove_subscription(&mut self, topic: &str, client_id: &str) -> Result<()> {
        let segments = parse_topic(topic)?;
        Self::remove_from(&mut self.root, &segments, client_id);

        if let Some(topics) = self.client_topics.get_mut(client_id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.client_topics.remove(client_id);
            }
        }
        Ok(())
    }

    /// Drop every subscription held by `client_id`.
    pub fn remove_client(&mut self, client_id: &str) {
        let Some(topics) = self.client_topics.remove(client_id) else {
            return;
        };
        for topic in topics {
            if let Ok(segments) = parse_topic(&topic) {
                Self::remove_from(&mut self.root, &segments, client_id);
            }
        }
    }

    /// Clients with a subscription matching the concrete `topic`.
    pub fn publish_set(&self, topic: &str) -> Result<BTreeSet<String>> {
        let segments = parse_topic(topic)?;
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<(&TopicNode, usize)> = VecDeque::new();
        queue.push_back((&self.root, 0));

        while let Some((node, index)) = queue.pop_front() {
            if index == segments.len() {
                out.extend(node.clients.iter().cloned());
                if let Some(rest) = node.children.get(MULTI_LEVEL) {
                    queue.push_back((rest, index));
                }
                continue;
            }

            if let Some(one) = node.children.get(SINGLE_LEVEL) {
                queue.push_back((one, index + 1));
            }
            if let Some(rest) = node.children.get(MULTI_LEVEL) {
                queue.push_back((rest, segments.len()));
            }
            if let Some(exact) = node.children.get(segments[index]) {
                queue.push_back((exact, index + 1));
            }
        }

        Ok(out)
    }

    /// Every topic that currently has at least one subscriber.
    pub fn topics(&self) -> BTreeSet<String> {
        self.client_topics.values().flatten().cloned().collect()
    }

    /// Returns whether `node` became empty and can be pruned.
    fn remove_from(node: &mut TopicNode, segments: &[&str], client_id: &str) -> bool {
        match segments.split_first() {
            None => {
                node.clients.remove(client_id);
            }
            Some((head, rest)) => {
                let prune = match node.children.get_mut(*head) {
                    Some(child) => Self::remove_from(child, rest, client_id),
                    None => false,
                };
                if prune {
                    node.children.remove(*head);
                }
            }
        }
        node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_topics() {
        let mut map = TopicMap::new();
        map.add_subscription("A", "r1").unwrap();
        map.add_subscription("A/B", "r2").unwrap();

        assert_eq!(map.publish_set("A").unwrap(), set(&["r1"]));
        assert_eq!(map.publish_set("A/B").unwrap(), set(&["r2"]));
        assert!(map.publish_set("A/B/C").unwrap().is_empty());
    }

    #[test]
    fn test_single_level_wildcard() {
        let mut map = TopicMap::new();
        map.add_subscription("A/+/C", "r1").unwrap();

        assert_eq!(map.publish_set("A/B/C").unwrap(), set(&["r1"]));
        assert_eq!(map.publish_set("A/X/C").unwrap(), set(&["r1"]));
        assert!(map.publish_set("A/C").unwrap().is_empty());
        assert!(map.publish_set("A/B/B/C").unwrap().is_empty());
    }

    #[test]
    fn test_multi_level_wildcard_matches_remainder() {
        let mut map = TopicMap::new();
        map.add_subscription("A/#", "r1").unwrap();

        assert_eq!(map.publish_set("A").unwrap(), set(&["r1"]));
        assert_eq!(map.publish_set("A/B").unwrap(), set(&["r1"]));
        assert_eq!(map.publish_set("A/B/C").unwrap(), set(&["r1"]));
        assert!(map.publish_set("B").unwrap().is_empty());
    }

    #[test]
    fn test_hash_must_be_last() {
        let mut map = TopicMap::new();
        assert!(map.add_subscription("A/#/B", "r1").is_err());
        assert!(map.publish_set("#/A").is_err());
    }

    #[test]
    fn test_remove_client_and_prune() {
        let mut map = TopicMap::new();
        map.add_subscription("A", "r1").unwrap();
        map.add_subscription("A/B", "r1").unwrap();
        map.add_subscription("A/B", "r2").unwrap();

        map.remove_client("r1");
        assert!(map.publish_set("A").unwrap().is_empty());
        assert_eq!(map.publish_set("A/B").unwrap(), set(&["r2"]));
        assert_eq!(map.topics(), set(&["A/B"]));

        map.remove_subscription("A/B", "r2").unwrap();
        assert!(map.root.is_empty());
        assert!(map.topics().is_empty());
    }
}
