//! Resource index backed by the shared store
//!
//! A resource is stored as a JSON record under its id key plus one empty
//! marker per type and interface, so each dimension query is a prefix scan.
//! Group membership lives in the [`GroupHierarchy`] and is mirrored in the
//! record's `groups` list.
//!
//! Records may carry concurrent siblings. `type` and `interfaces` come from
//! the last readable sibling; `groups` is the union over all of them.

use crate::group_tree::GroupHierarchy;
use crate::ResourceIndex;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use trellis_core::types::{is_descendant_or_self, validate_group_path};
use trellis_core::{
    keys, observe, BatchOp, Context, Dimension, IndexConfig, ResourceDescriptor,
    ResourceProperties, ResourceSet, Result, SharedStore, StoreValue, TrellisError, TtlCache,
};

/// What a cached index answer is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexCacheKey {
    /// `get_resources(dimension, value)`
    Dimension {
        dimension: Dimension,
        value: Option<String>,
    },
    /// `get_resource_properties(id)`
    Properties(String),
}

impl IndexCacheKey {
    pub fn dimension(dimension: Dimension, value: Option<&str>) -> Self {
        IndexCacheKey::Dimension {
            dimension,
            value: value.map(str::to_string),
        }
    }

    /// Whether this is a group query whose answer can change when membership
    /// of `path` changes: the unconstrained query, `path`, its ancestors and
    /// its descendants.
    fn is_group_affected_by(&self, path: &str) -> bool {
        match self {
            IndexCacheKey::Dimension {
                dimension: Dimension::Group,
                value: None,
            } => true,
            IndexCacheKey::Dimension {
                dimension: Dimension::Group,
                value: Some(value),
            } => is_descendant_or_self(value, path) || is_descendant_or_self(path, value),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum CachedEntry {
    Resources(ResourceSet),
    Properties(ResourceProperties),
}

/// Lenient view of one record sibling
#[derive(Debug, Default, Deserialize)]
struct StoredRecord {
    #[serde(rename = "type")]
    resource_type: Option<String>,
    interfaces: Option<Vec<String>>,
    #[serde(default)]
    groups: BTreeSet<String>,
}

fn parse_siblings(resource_id: &str, siblings: &[String]) -> Vec<StoredRecord> {
    siblings
        .iter()
        .filter_map(|sibling| match serde_json::from_str(sibling) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(resource = resource_id, "Skipping unreadable record sibling: {}", e);
                None
            }
        })
        .collect()
}

/// Merge record siblings; `None` when no usable type and interface list.
fn merge_record(resource_id: &str, value: &StoreValue) -> Option<ResourceProperties> {
    let mut resource_type = None;
    let mut interfaces = None;
    let mut groups = BTreeSet::new();

    for record in parse_siblings(resource_id, &value.siblings) {
        resource_type = record.resource_type;
        interfaces = record.interfaces;
        groups.extend(record.groups);
    }

    Some(ResourceProperties {
        resource_type: resource_type?,
        interfaces: interfaces?,
        groups,
    })
}

fn context_of(value: Option<&StoreValue>) -> Context {
    value.map(|v| v.context.clone()).unwrap_or_default()
}

pub struct ReplicatedResourceIndex {
    store: Arc<dyn SharedStore>,
    groups: GroupHierarchy,
    cache: TtlCache<IndexCacheKey, CachedEntry>,
}

impl ReplicatedResourceIndex {
    pub fn new(store: Arc<dyn SharedStore>, config: &IndexConfig) -> Self {
        Self {
            groups: GroupHierarchy::new(store.clone()),
            cache: TtlCache::new("resource_index", &config.cache),
            store,
        }
    }

    pub fn hierarchy(&self) -> &GroupHierarchy {
        &self.groups
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.store.batch(ops).await;
        observe::record_store_batch(started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            tracing::warn!("Resource index batch failed: {}", e);
        }
        result
    }

    async fn scan_resource_ids(&self, prefix: &str) -> Result<ResourceSet> {
        let mut ids = ResourceSet::new();
        for entry in self.store.get_matches(prefix).await? {
            ids.insert(keys::resource::resource_id_from_key(&entry.key)?);
        }
        Ok(ids)
    }

    /// Rewrite a resource record with `path` removed from its groups.
    async fn remove_group_from_record(&self, resource_id: &str, path: &str) -> Result<()> {
        let key = keys::resource::record(resource_id);
        let value = self
            .store
            .get_one(&key)
            .await?
            .ok_or_else(|| TrellisError::NotFound(format!("no such resource: {}", resource_id)))?;
        let mut properties = merge_record(resource_id, &value).ok_or_else(|| {
            TrellisError::Serialization(format!("unreadable record for {}", resource_id))
        })?;
        properties.groups.remove(path);
        self.store
            .put(&key, &serde_json::to_string(&properties)?, &value.context)
            .await
    }

    fn invalidate_unconstrained(&self) {
        for dimension in Dimension::ALL {
            self.cache
                .invalidate(&IndexCacheKey::dimension(dimension, None));
        }
    }

    fn invalidate_group(&self, path: &str) {
        self.cache.invalidate_where(|key| key.is_group_affected_by(path));
    }

    fn on_resource_added(
        &self,
        resource: &ResourceDescriptor,
        previous: Option<&ResourceProperties>,
    ) {
        tracing::trace!(resource = %resource.id, "Invalidating index cache after add");
        self.invalidate_unconstrained();
        self.cache.invalidate(&IndexCacheKey::dimension(
            Dimension::Id,
            Some(&resource.id),
        ));
        self.cache.invalidate(&IndexCacheKey::dimension(
            Dimension::Type,
            Some(&resource.resource_type),
        ));
        for interface in &resource.interfaces {
            self.cache
                .invalidate(&IndexCacheKey::dimension(Dimension::Interface, Some(interface)));
        }
        if let Some(previous) = previous {
            self.cache.invalidate(&IndexCacheKey::dimension(
                Dimension::Type,
                Some(&previous.resource_type),
            ));
            for interface in &previous.interfaces {
                self.cache
                    .invalidate(&IndexCacheKey::dimension(Dimension::Interface, Some(interface)));
            }
        }
        self.cache
            .invalidate(&IndexCacheKey::Properties(resource.id.clone()));
    }

    fn on_resource_removed(
        &self,
        resource_id: &str,
        types: &BTreeSet<String>,
        interfaces: &BTreeSet<String>,
        groups: &BTreeSet<String>,
    ) {
        tracing::trace!(resource = resource_id, "Invalidating index cache after remove");
        self.invalidate_unconstrained();
        self.cache
            .invalidate(&IndexCacheKey::dimension(Dimension::Id, Some(resource_id)));
        for resource_type in types {
            self.cache
                .invalidate(&IndexCacheKey::dimension(Dimension::Type, Some(resource_type)));
        }
        for interface in interfaces {
            self.cache
                .invalidate(&IndexCacheKey::dimension(Dimension::Interface, Some(interface)));
        }
        for group in groups {
            self.invalidate_group(group);
        }
        self.cache
            .invalidate(&IndexCacheKey::Properties(resource_id.to_string()));
    }

    fn on_membership_changed(&self, resource_id: &str, path: &str) {
        tracing::trace!(resource = resource_id, group = path, "Invalidating group cache");
        self.cache
            .invalidate(&IndexCacheKey::Properties(resource_id.to_string()));
        self.invalidate_group(path);
    }

    fn on_group_deleted(&self, path: &str, members: &ResourceSet) {
        tracing::trace!(group = path, "Invalidating cache after group delete");
        for resource_id in members {
            self.cache
                .invalidate(&IndexCacheKey::Properties(resource_id.clone()));
        }
        self.invalidate_group(path);
    }
}

#[async_trait]
impl ResourceIndex for ReplicatedResourceIndex {
    async fn get_resources(
        &self,
        dimension: Dimension,
        value: Option<&str>,
    ) -> Result<ResourceSet> {
        let cache_key = IndexCacheKey::dimension(dimension, value);
        if let Some(CachedEntry::Resources(set)) = self.cache.get(&cache_key) {
            return Ok(set);
        }

        let set = match (dimension, value) {
            // no resource can be a member of a malformed path
            (Dimension::Group, Some(path)) if validate_group_path(path).is_err() => {
                ResourceSet::new()
            }
            (Dimension::Group, path) => self.groups.list_group(path.unwrap_or("")).await?,
            (_, None) => {
                self.scan_resource_ids(&keys::resource::dimension_prefix(Dimension::Id))
                    .await?
            }
            (dimension, Some(value)) => {
                self.scan_resource_ids(&keys::resource::value_prefix(dimension, value))
                    .await?
            }
        };

        self.cache
            .insert(cache_key, CachedEntry::Resources(set.clone()));
        Ok(set)
    }

    async fn get_resource_properties(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceProperties>> {
        let cache_key = IndexCacheKey::Properties(resource_id.to_string());
        if let Some(CachedEntry::Properties(properties)) = self.cache.get(&cache_key) {
            return Ok(Some(properties));
        }

        let merged = self
            .store
            .get_one(&keys::resource::record(resource_id))
            .await?
            .and_then(|value| merge_record(resource_id, &value));

        match &merged {
            Some(properties) => self
                .cache
                .insert(cache_key, CachedEntry::Properties(properties.clone())),
            None => self.cache.invalidate(&cache_key),
        }
        Ok(merged)
    }

    async fn add_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        let mut marker_keys = vec![keys::resource::record(&resource.id)];
        marker_keys.push(keys::resource::marker(
            Dimension::Type,
            &resource.resource_type,
            &resource.id,
        ));
        for interface in &resource.interfaces {
            marker_keys.push(keys::resource::marker(
                Dimension::Interface,
                interface,
                &resource.id,
            ));
        }

        let values = self.store.get(&marker_keys).await?;
        let current = values.first().and_then(Option::as_ref);
        let previous = current.and_then(|value| merge_record(&resource.id, value));

        let mut properties = ResourceProperties::from_descriptor(resource);
        if let Some(value) = current {
            properties.groups = parse_siblings(&resource.id, &value.siblings)
                .into_iter()
                .flat_map(|record| record.groups)
                .collect();
        }

        let mut ops = Vec::with_capacity(marker_keys.len() + 2);
        ops.push(BatchOp::put(
            marker_keys[0].clone(),
            serde_json::to_string(&properties)?,
            context_of(current),
        ));
        for (key, value) in marker_keys.iter().zip(values.iter()).skip(1) {
            ops.push(BatchOp::put(key.clone(), "", context_of(value.as_ref())));
        }

        // Markers of a previous registration that no longer apply
        if let Some(previous) = &previous {
            if previous.resource_type != resource.resource_type {
                ops.push(BatchOp::delete(keys::resource::marker(
                    Dimension::Type,
                    &previous.resource_type,
                    &resource.id,
                )));
            }
            for interface in &previous.interfaces {
                if !resource.interfaces.contains(interface) {
                    ops.push(BatchOp::delete(keys::resource::marker(
                        Dimension::Interface,
                        interface,
                        &resource.id,
                    )));
                }
            }
        }

        self.write_batch(ops).await?;
        tracing::debug!(resource = %resource.id, "Resource added");
        self.on_resource_added(resource, previous.as_ref());
        Ok(())
    }

    async fn remove_resource(&self, resource_id: &str) -> Result<()> {
        let record_key = keys::resource::record(resource_id);
        let Some(value) = self.store.get_one(&record_key).await? else {
            self.on_resource_removed(
                resource_id,
                &BTreeSet::new(),
                &BTreeSet::new(),
                &BTreeSet::new(),
            );
            return Ok(());
        };

        let mut types = BTreeSet::new();
        let mut interfaces = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for record in parse_siblings(resource_id, &value.siblings) {
            types.extend(record.resource_type);
            interfaces.extend(record.interfaces.unwrap_or_default());
            groups.extend(record.groups);
        }

        let mut ops = vec![BatchOp::delete(record_key)];
        for resource_type in &types {
            ops.push(BatchOp::delete(keys::resource::marker(
                Dimension::Type,
                resource_type,
                resource_id,
            )));
        }
        for interface in &interfaces {
            ops.push(BatchOp::delete(keys::resource::marker(
                Dimension::Interface,
                interface,
                resource_id,
            )));
        }
        self.write_batch(ops).await?;

        for group in &groups {
            self.groups.leave_group(resource_id, group).await?;
        }

        tracing::debug!(resource = resource_id, "Resource removed");
        self.on_resource_removed(resource_id, &types, &interfaces, &groups);
        Ok(())
    }

    async fn create_group(&self, path: &str) -> Result<()> {
        validate_group_path(path)?;
        self.groups.create_group(path).await
    }

    async fn delete_group(&self, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let members = self.groups.list_group(path).await?;
        let record_keys: Vec<String> = members
            .iter()
            .map(|id| keys::resource::record(id))
            .collect();
        let values = self.store.get(&record_keys).await?;

        let mut ops = Vec::new();
        for ((resource_id, key), value) in members.iter().zip(&record_keys).zip(values) {
            let Some(value) = value else { continue };
            let Some(mut properties) = merge_record(resource_id, &value) else {
                continue;
            };
            properties
                .groups
                .retain(|group| !is_descendant_or_self(group, path));
            ops.push(BatchOp::put(
                key.clone(),
                serde_json::to_string(&properties)?,
                value.context,
            ));
        }
        self.write_batch(ops).await?;

        self.groups.delete_group(path).await?;
        self.on_group_deleted(path, &members);
        Ok(())
    }

    async fn join_group(&self, resource_id: &str, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let key = keys::resource::record(resource_id);
        let value = self
            .store
            .get_one(&key)
            .await?
            .ok_or_else(|| TrellisError::NotFound(format!("no such resource: {}", resource_id)))?;
        let mut properties = merge_record(resource_id, &value).ok_or_else(|| {
            TrellisError::Serialization(format!("unreadable record for {}", resource_id))
        })?;

        properties.groups.insert(path.to_string());
        self.store
            .put(&key, &serde_json::to_string(&properties)?, &value.context)
            .await?;
        self.groups.join_group(resource_id, path).await?;

        self.on_membership_changed(resource_id, path);
        Ok(())
    }

    /// The hierarchy entry is removed even when the record cannot be
    /// updated; the record error is then returned.
    async fn leave_group(&self, resource_id: &str, path: &str) -> Result<()> {
        validate_group_path(path)?;
        let record_result = self.remove_group_from_record(resource_id, path).await;
        let tree_result = self.groups.leave_group(resource_id, path).await;

        self.on_membership_changed(resource_id, path);
        record_result?;
        tree_result
    }
}
