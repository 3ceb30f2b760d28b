//! Resource index and group hierarchy
//!
//! The index answers "which resources have this id / type / interface /
//! group" and "what are the properties of this resource". Two variants:
//! - [`LocalResourceIndex`]: in-process maps plus a wildcard topic trie for
//!   groups, for single-node use and tests
//! - [`ReplicatedResourceIndex`]: records and membership markers in the
//!   [`SharedStore`](trellis_core::SharedStore), with a [`GroupHierarchy`]
//!   and a TTL cache in front of both

pub mod group_tree;
pub mod local;
pub mod replicated;
pub mod topic_map;

pub use group_tree::GroupHierarchy;
pub use local::LocalResourceIndex;
pub use replicated::{IndexCacheKey, ReplicatedResourceIndex};
pub use topic_map::TopicMap;

use async_trait::async_trait;
use trellis_core::{Dimension, ResourceDescriptor, ResourceProperties, ResourceSet, Result};

/// Queries and mutations every resource index supports
#[async_trait]
pub trait ResourceIndex: Send + Sync {
    /// Resources with `dimension = value`.
    ///
    /// Without a value: every known resource for `id`, `type` and
    /// `interface`, and every resource in at least one group for `group`.
    /// A group value matches members of that path and of all paths below it.
    async fn get_resources(&self, dimension: Dimension, value: Option<&str>)
        -> Result<ResourceSet>;

    /// `None` if the resource is unknown.
    async fn get_resource_properties(&self, resource_id: &str)
        -> Result<Option<ResourceProperties>>;

    /// Register a resource or overwrite its type and interfaces; group
    /// memberships survive re-registration.
    async fn add_resource(&self, resource: &ResourceDescriptor) -> Result<()>;

    /// Forget a resource and all of its memberships. Unknown ids are a no-op.
    async fn remove_resource(&self, resource_id: &str) -> Result<()>;

    async fn create_group(&self, path: &str) -> Result<()>;

    /// Delete a group and every group below it.
    async fn delete_group(&self, path: &str) -> Result<()>;

    async fn join_group(&self, resource_id: &str, path: &str) -> Result<()>;

    async fn leave_group(&self, resource_id: &str, path: &str) -> Result<()>;
}
