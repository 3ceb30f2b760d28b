//! Trellis Prelude
//!
//! ```
//! use trellis::prelude::*;
//! ```

// Node
pub use crate::TrellisNode;

// Core types
pub use crate::{
    Dimension, GroupNode, Predicate, ResourceDescriptor, ResourceProperties, ResourceSet,
    Result, TrellisError,
};

// Configs
pub use crate::{CacheConfig, EvictionPolicy, IndexConfig, NodeConfig, RegistryConfig};

// Traits
pub use crate::{Reachability, ResourceIndex, SharedStore};

// Implementations
pub use crate::{
    CloudSubscriberRegistry, LocalResourceIndex, MemoryStore, ReplicatedResourceIndex,
    ReplicatedSubscriberRegistry, ResourceSelector, SubscriberRegistry,
};

// Selections
pub use crate::{parse, SelectionGraph, Subscription};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
