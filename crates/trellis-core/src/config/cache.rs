use serde::{Deserialize, Serialize};

/// Eviction policy for bounded caches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the oldest inserted key.
    Fifo,
    /// Evict the key that has gone longest without being read.
    #[default]
    Lru,
}

/// Configuration shared by the index cache and the remote-subscriber cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether the cache is consulted at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries (default: 1000)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Time-to-live for entries in seconds (default: 600)
    ///
    /// For the remote-subscriber cache this is also the staleness window:
    /// entries are never invalidated explicitly.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Eviction policy once `capacity` is reached (default: LRU)
    #[serde(default)]
    pub policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
            policy: EvictionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    10 * 60
}
