//! Bounded, TTL-expiring in-memory cache
//!
//! Backs the resource-index query cache and the remote-subscriber cache.
//! Values live in a `DashMap`; a FIFO queue or an LRU list bounds the size.
//! Expired entries are dropped lazily when read.

use crate::config::{CacheConfig, EvictionPolicy};
use crate::observe;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

type NodeIdx = usize;

struct LruNode<K> {
    key: K,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
}

/// Index-based doubly-linked list: head is most recently used.
struct LruList<K> {
    nodes: Vec<Option<LruNode<K>>>,
    free: Vec<NodeIdx>,
    head: Option<NodeIdx>,
    tail: Option<NodeIdx>,
    index: HashMap<K, NodeIdx>,
}

impl<K: Eq + Hash + Clone> LruList<K> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(&idx) = self.index.get(key) {
            if self.head != Some(idx) {
                self.unlink(idx);
                self.link_front(idx);
            }
            return;
        }

        let node = LruNode {
            key: key.clone(),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key.clone(), idx);
        self.link_front(idx);
    }

    fn pop_back(&mut self) -> Option<K> {
        let idx = self.tail?;
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some(node.key)
    }

    fn remove(&mut self, key: &K) {
        if let Some(idx) = self.index.remove(key) {
            self.unlink(idx);
            self.nodes[idx] = None;
            self.free.push(idx);
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn link_front(&mut self, idx: NodeIdx) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: NodeIdx) {
        let (prev, next) = match self.nodes[idx].as_mut() {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

/// Thread-safe bounded cache with TTL expiry
pub struct TtlCache<K, V> {
    name: &'static str,
    entries: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
    policy: EvictionPolicy,
    fifo_queue: Mutex<VecDeque<K>>,
    lru_list: Mutex<LruList<K>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `name` labels cache metrics.
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        Self {
            name,
            entries: DashMap::with_capacity(config.capacity.min(4096)),
            capacity: config.capacity,
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled && config.capacity > 0,
            policy: config.policy,
            fifo_queue: Mutex::new(VecDeque::new()),
            lru_list: Mutex::new(LruList::new()),
        }
    }

    /// Same as `new` with a sub-second TTL, for tests that wait out expiry.
    pub fn with_ttl(name: &'static str, config: &CacheConfig, ttl: Duration) -> Self {
        let mut cache = Self::new(name, config);
        cache.ttl = ttl;
        cache
    }

    pub fn disabled(name: &'static str) -> Self {
        Self::new(name, &CacheConfig::disabled())
    }

    /// Fresh value for `key`, if any. Promotes the key under LRU.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }

        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.remove(key);
                None
            }
            None => None,
        };

        if hit.is_some() && self.policy == EvictionPolicy::Lru {
            self.lru_list.lock().touch(key);
        }
        observe::record_cache_lookup(self.name, hit.is_some());
        hit
    }

    /// Insert or replace, evicting one entry if the cache is full.
    pub fn insert(&self, key: K, value: V) {
        if !self.enabled {
            return;
        }

        let is_new = !self.entries.contains_key(&key);
        if is_new && self.entries.len() >= self.capacity {
            self.evict_one();
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );

        match self.policy {
            EvictionPolicy::Fifo if is_new => self.fifo_queue.lock().push_back(key),
            EvictionPolicy::Fifo => {}
            EvictionPolicy::Lru => self.lru_list.lock().touch(&key),
        }
    }

    pub fn invalidate(&self, key: &K) {
        if self.enabled {
            self.remove(key);
        }
    }

    /// Drop every entry whose key satisfies `predicate`.
    pub fn invalidate_where<F>(&self, predicate: F)
    where
        F: Fn(&K) -> bool,
    {
        if !self.enabled {
            return;
        }
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        if !doomed.is_empty() {
            tracing::trace!(cache = self.name, removed = doomed.len(), "Invalidated cache entries");
        }
    }

    pub fn clear(&self) {
        tracing::trace!(cache = self.name, removed = self.entries.len(), "Clearing cache");
        self.entries.clear();
        self.fifo_queue.lock().clear();
        self.lru_list.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            enabled: self.enabled,
            policy: self.policy,
        }
    }

    fn remove(&self, key: &K) {
        self.entries.remove(key);
        match self.policy {
            EvictionPolicy::Fifo => self.fifo_queue.lock().retain(|queued| queued != key),
            EvictionPolicy::Lru => self.lru_list.lock().remove(key),
        }
    }

    fn evict_one(&self) {
        match self.policy {
            EvictionPolicy::Fifo => {
                let mut queue = self.fifo_queue.lock();
                while let Some(key) = queue.pop_front() {
                    if self.entries.remove(&key).is_some() {
                        break;
                    }
                }
            }
            EvictionPolicy::Lru => {
                let evicted = self.lru_list.lock().pop_back();
                if let Some(key) = evicted {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub enabled: bool,
    pub policy: EvictionPolicy,
}
