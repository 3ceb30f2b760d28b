pub mod cache;
pub mod node;

pub use cache::{CacheConfig, EvictionPolicy};
pub use node::{IndexConfig, NodeConfig, RegistryConfig};
