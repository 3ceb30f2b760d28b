//! Group hierarchy in the shared store
//!
//! Each group path owns one key holding its *direct* members as a JSON array.
//! The tree is never stored as such; `get_group` rebuilds it from the path key
//! and a scan of everything below it.

use std::collections::BTreeSet;
use std::sync::Arc;
use trellis_core::keys;
use trellis_core::types::parent_group;
use trellis_core::{
    BatchOp, Context, GroupNode, ResourceSet, Result, SharedStore, StoreValue, TrellisError,
};

/// Union of the member sets in every sibling; unreadable siblings are skipped.
fn merge_members(value: Option<&StoreValue>) -> BTreeSet<String> {
    let mut members = BTreeSet::new();
    let Some(value) = value else {
        return members;
    };
    for sibling in &value.siblings {
        match serde_json::from_str::<BTreeSet<String>>(sibling) {
            Ok(set) => members.extend(set),
            Err(e) => tracing::warn!("Skipping unreadable group sibling: {}", e),
        }
    }
    members
}

fn context_of(value: Option<&StoreValue>) -> Context {
    value.map(|v| v.context.clone()).unwrap_or_default()
}

pub struct GroupHierarchy {
    store: Arc<dyn SharedStore>,
}

impl GroupHierarchy {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Ensure `path` has a record, keeping any members it already has.
    pub async fn create_group(&self, path: &str) -> Result<()> {
        self.update(path, false, |_| {}).await
    }

    /// Remove `path` and every path below it in one batch.
    ///
    /// The parent is rewritten first so it still resolves afterwards.
    pub async fn delete_group(&self, path: &str) -> Result<()> {
        let mut ops = vec![BatchOp::delete(keys::group::node(path))];
        for entry in self
            .store
            .get_matches(&keys::group::descendants_prefix(path))
            .await?
        {
            ops.push(BatchOp::Delete {
                key: entry.key,
                context: entry.value.context,
            });
        }

        if let Some(parent) = parent_group(path) {
            self.create_group(parent).await?;
        }

        tracing::info!(group = path, keys = ops.len(), "Deleting group");
        self.store.batch(ops).await
    }

    pub async fn join_group(&self, resource_id: &str, path: &str) -> Result<()> {
        self.update(path, false, |members| {
            members.insert(resource_id.to_string());
        })
        .await
    }

    /// No-op if the group has no record.
    pub async fn leave_group(&self, resource_id: &str, path: &str) -> Result<()> {
        self.update(path, true, |members| {
            members.remove(resource_id);
        })
        .await
    }

    /// The subtree rooted at `path`; the empty path is the root.
    ///
    /// Fails with `NotFound` for a non-root path without any record at or
    /// below it. The root always exists.
    pub async fn get_group(&self, path: &str) -> Result<GroupNode> {
        let mut root = GroupNode::default();
        let mut found = 0usize;

        if let Some(value) = self.store.get_one(&keys::group::node(path)).await? {
            if !value.siblings.is_empty() {
                found += 1;
                root.resources.extend(merge_members(Some(&value)));
            }
        }

        for entry in self
            .store
            .get_matches(&keys::group::descendants_prefix(path))
            .await?
        {
            found += 1;
            let segments = keys::group::relative_segments(path, &entry.key)?;
            let node = root.descend_mut(segments.iter().map(String::as_str));
            node.resources.extend(merge_members(Some(&entry.value)));
        }

        if !path.is_empty() && found == 0 {
            return Err(TrellisError::NotFound(format!("no such group: {}", path)));
        }
        Ok(root)
    }

    /// Every resource in `path` or below; empty for an unknown group.
    pub async fn list_group(&self, path: &str) -> Result<ResourceSet> {
        match self.get_group(path).await {
            Ok(group) => Ok(group.flatten()),
            Err(TrellisError::NotFound(_)) => Ok(ResourceSet::new()),
            Err(e) => Err(e),
        }
    }

    /// Read-merge-write of one path key. Concurrent writers on other nodes
    /// surface as siblings, merged by union on the next read.
    async fn update<F>(&self, path: &str, skip_if_missing: bool, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeSet<String>) + Send,
    {
        let key = keys::group::node(path);
        let current = self.store.get_one(&key).await?;
        if current.is_none() && skip_if_missing {
            return Ok(());
        }

        let mut members = merge_members(current.as_ref());
        apply(&mut members);
        let value = serde_json::to_string(&members)?;
        self.store
            .put(&key, &value, &context_of(current.as_ref()))
            .await
    }
}
