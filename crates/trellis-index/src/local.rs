//! In-process resource index

use crate::topic_map::TopicMap;
use crate::ResourceIndex;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use trellis_core::types::{group_ancestors, is_descendant_or_self, validate_group_path};
use trellis_core::{
    Dimension, ResourceDescriptor, ResourceProperties, ResourceSet, Result, TrellisError,
};

#[derive(Debug, Default)]
struct IndexState {
    resources: BTreeMap<String, ResourceProperties>,
    by_type: HashMap<String, ResourceSet>,
    by_interface: HashMap<String, ResourceSet>,
    groups: TopicMap,
    known_groups: BTreeSet<String>,
}

impl IndexState {
    fn unindex(&mut self, resource_id: &str, properties: &ResourceProperties) {
        remove_member(&mut self.by_type, &properties.resource_type, resource_id);
        for interface in &properties.interfaces {
            remove_member(&mut self.by_interface, interface, resource_id);
        }
    }

    fn index(&mut self, resource_id: &str, properties: &ResourceProperties) {
        self.by_type
            .entry(properties.resource_type.clone())
            .or_default()
            .insert(resource_id.to_string());
        for interface in &properties.interfaces {
            self.by_interface
                .entry(interface.clone())
                .or_default()
                .insert(resource_id.to_string());
        }
    }

    /// Rebuild the topic subscriptions of one resource from its group list,
    /// so leaving `A/B` keeps `A` while `A/C` is still joined.
    fn sync_groups(&mut self, resource_id: &str) -> Result<()> {
        self.groups.remove_client(resource_id);
        let expanded = match self.resources.get(resource_id) {
            Some(properties) => properties.expanded_groups(),
            None => return Ok(()),
        };
        for path in expanded {
            self.groups.add_subscription(&path, resource_id)?;
        }
        Ok(())
    }
}

fn remove_member(index: &mut HashMap<String, ResourceSet>, value: &str, resource_id: &str) {
    if let Some(members) = index.get_mut(value) {
        members.remove(resource_id);
        if members.is_empty() {
            index.remove(value);
        }
    }
}

/// Resource index held entirely in process memory
///
/// Group membership is kept in a [`TopicMap`]: joining `A/B` subscribes the
/// resource to `A` and `A/B`, and a group query publishes to the path. Group
/// paths never contain `+` or `#`, so only concrete topics are subscribed
/// here and a malformed query path matches nothing.
#[derive(Debug, Default)]
pub struct LocalResourceIndex {
    state: RwLock<IndexState>,
}

impl LocalResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths created explicitly or joined by some resource.
    pub fn groups(&self) -> BTreeSet<String> {
        let state = self.state.read();
        let mut groups = state.known_groups.clone();
        groups.extend(state.groups.topics());
        groups
    }
}

#[async_trait]
impl ResourceIndex for LocalResourceIndex {
    async fn get_resources(
        &self,
        dimension: Dimension,
        value: Option<&str>,
    ) -> Result<ResourceSet> {
        let state = self.state.read();
        let set = match (dimension, value) {
            (Dimension::Group, Some(path)) if validate_group_path(path).is_err() => {
                ResourceSet::new()
            }
            (Dimension::Group, Some(path)) => state.groups.publish_set(path)?,
            (Dimension::Group, None) => state
                .resources
                .iter()
                .filter(|(_, properties)| !properties.groups.is_empty())
                .map(|(id, _)| id.clone())
                .collect(),
            (_, None) => state.resources.keys().cloned().collect(),
            (Dimension::Id, Some(id)) => state
                .resources
                .get_key_value(id)
                .map(|(id, _)| id.clone())
                .into_iter()
                .collect(),
            (Dimension::Type, Some(value)) => {
                state.by_type.get(value).cloned().unwrap_or_default()
            }
            (Dimension::Interface, Some(value)) => {
                state.by_interface.get(value).cloned().unwrap_or_default()
            }
        };
        Ok(set)
    }

    async fn get_resource_properties(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceProperties>> {
        Ok(self.state.read().resources.get(resource_id).cloned())
    }

    async fn add_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        let mut state = self.state.write();
        let mut properties = ResourceProperties::from_descriptor(resource);

        if let Some(previous) = state.resources.remove(&resource.id) {
            state.unindex(&resource.id, &previous);
            properties.groups = previous.groups;
        }

        state.index(&resource.id, &properties);
        state.resources.insert(resource.id.clone(), properties);
        state.sync_groups(&resource.id)
    }

    async fn remove_resource(&self, resource_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(previous) = state.resources.remove(resource_id) {
            state.unindex(resource_id, &previous);
        }
        state.groups.remove_client(resource_id);
        Ok(())
    }

    async fn create_group(&self, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let mut state = self.state.write();
        for ancestor in group_ancestors(path) {
            state.known_groups.insert(ancestor);
        }
        Ok(())
    }

    async fn delete_group(&self, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let mut state = self.state.write();
        state
            .known_groups
            .retain(|group| !is_descendant_or_self(group, path));

        let affected: Vec<String> = state
            .resources
            .iter_mut()
            .filter_map(|(id, properties)| {
                let before = properties.groups.len();
                properties
                    .groups
                    .retain(|group| !is_descendant_or_self(group, path));
                (properties.groups.len() != before).then(|| id.clone())
            })
            .collect();

        for resource_id in affected {
            state.sync_groups(&resource_id)?;
        }
        Ok(())
    }

    async fn join_group(&self, resource_id: &str, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let mut state = self.state.write();
        match state.resources.get_mut(resource_id) {
            Some(properties) => {
                properties.groups.insert(path.to_string());
            }
            None => {
                return Err(TrellisError::NotFound(format!(
                    "no such resource: {}",
                    resource_id
                )))
            }
        }
        state.sync_groups(resource_id)
    }

    async fn leave_group(&self, resource_id: &str, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let mut state = self.state.write();
        match state.resources.get_mut(resource_id) {
            Some(properties) => {
                properties.groups.remove(path);
            }
            None => return Ok(()),
        }
        state.sync_groups(resource_id)
    }
}
