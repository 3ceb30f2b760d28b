//! Trellis Core: shared types and plumbing for event routing
//!
//! This crate defines what the index and registry crates build on:
//! - Selection language: `Predicate` trees parsed from text, and `Leaf` inputs
//! - Resource model: descriptors, properties and slash-delimited groups
//! - Shared store: an eventually-consistent KV abstraction with sibling values
//! - Key layout: how index and registry records are named in the store
//! - Stripe locking and TTL caches used by the replicated variants

pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod lock_manager;
pub mod observe;
pub mod selection;
pub mod store;
pub mod types;

pub use cache::{CacheStats, TtlCache};
pub use config::{CacheConfig, EvictionPolicy, IndexConfig, NodeConfig, RegistryConfig};
pub use error::{Result, TrellisError};
pub use lock_manager::{KeyLockGuard, LockManager};
pub use selection::{parse, Leaf, Predicate};
pub use store::{BatchOp, Context, SharedStore, StoreEntry, StoreValue};
pub use types::{
    Dimension, GroupNode, ResourceDescriptor, ResourceProperties, ResourceSet,
};
