//! Trellis: selection-based event routing for a fleet of servers
//!
//! Each server keeps resources (devices, services, ...) described by a type,
//! a set of interfaces and the groups they joined. Subscribers register a
//! selection such as `type="Light" and group="Kitchen"` together with an
//! event name, and Trellis answers "who wants event E from resource R?" for
//! this server and for every other server sharing the store.
//!
//! - **Resource index**: dimension lookups and the group hierarchy, kept in
//!   an eventually-consistent shared store
//! - **Subscription registry**: selections compiled into graphs, matched by
//!   input keys, and replicated so peers can route events to this server
//! - **Selector**: one-shot evaluation of any selection, negation included
//!
//! # Quick Start
//!
//! ```no_run
//! use trellis::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let node = TrellisNode::new(NodeConfig::new("server-1"), store)?;
//!
//! node.add_resource(&ResourceDescriptor::new("dev1", "Light", ["Power"])).await?;
//! node.join_group("dev1", "Kitchen").await?;
//!
//! node.subscribe("ui", r#"type="Light" and group="Kitchen""#, "state-power").await?;
//! let subscribers = node.get_subscribers("dev1", "state-power").await?;
//! assert!(subscribers.contains("ui"));
//! # Ok(())
//! # }
//! ```

pub mod node;
pub mod prelude;

pub use trellis_core::{
    config::{CacheConfig, EvictionPolicy, IndexConfig, NodeConfig, RegistryConfig},
    error::{Result, TrellisError},
    parse,
    store::{BatchOp, Context, SharedStore, StoreEntry, StoreValue},
    types::{Dimension, GroupNode, ResourceDescriptor, ResourceProperties, ResourceSet},
    Leaf, Predicate,
};

pub use trellis_index::{LocalResourceIndex, ReplicatedResourceIndex, ResourceIndex};
pub use trellis_memstore::MemoryStore;
pub use trellis_registry::{
    CloudSubscriberRegistry, Reachability, ReplicatedSubscriberRegistry, ResourceSelector,
    SelectionGraph, SubscriberRegistry, Subscription, CLOUD_SUBSCRIBER,
};

pub use node::TrellisNode;
