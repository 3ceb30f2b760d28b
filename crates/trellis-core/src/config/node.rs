use super::cache::CacheConfig;
use crate::error::{Result, TrellisError};
use serde::{Deserialize, Serialize};

/// Configuration for a resource index
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Cache for dimension queries and resource properties
    #[serde(default)]
    pub cache: CacheConfig,
}

impl IndexConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Configuration for the replicated subscription registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Identity of this server in the subscription log
    ///
    /// Optional inside a `NodeConfig`, which supplies its own.
    #[serde(default)]
    pub server_id: String,

    /// Cache for `get_remote_subscribers` results
    #[serde(default)]
    pub remote_cache: CacheConfig,

    /// Number of stripes in the per-subscription lock manager (default: 256)
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,

    /// Lock acquisition timeout in milliseconds (default: 5000)
    ///
    /// A subscribe or unsubscribe that cannot take its subscription lock in
    /// time fails with `LockTimeout` before touching the store.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            remote_cache: CacheConfig::default(),
            lock_stripes: default_lock_stripes(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }

    pub fn with_remote_cache(mut self, cache: CacheConfig) -> Self {
        self.remote_cache = cache;
        self
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_id.is_empty() {
            return Err(TrellisError::Config("server_id must not be empty".into()));
        }
        if self.lock_stripes == 0 {
            return Err(TrellisError::Config("lock_stripes must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for one node of the fabric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub server_id: String,

    #[serde(default)]
    pub index: IndexConfig,

    /// Registry settings; `server_id` here is overwritten by the node's own
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

impl NodeConfig {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            index: IndexConfig::default(),
            registry: None,
        }
    }

    /// Parse a node configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|e| TrellisError::Config(format!("invalid node config: {}", e)))?;
        config.registry_config().validate()?;
        Ok(config)
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Effective registry configuration for this node.
    pub fn registry_config(&self) -> RegistryConfig {
        let mut registry = self
            .registry
            .clone()
            .unwrap_or_else(|| RegistryConfig::new(self.server_id.clone()));
        registry.server_id = self.server_id.clone();
        registry
    }
}

fn default_lock_stripes() -> usize {
    256
}

fn default_lock_timeout() -> u64 {
    5000
}
