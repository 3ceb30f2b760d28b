use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use trellis_core::{BatchOp, Context, Result, SharedStore, StoreEntry, StoreValue, TrellisError};

#[derive(Debug, Clone)]
struct Slot {
    siblings: Vec<String>,
    version: u64,
}

impl Slot {
    fn context(&self) -> Context {
        Context::new(self.version.to_string())
    }

    fn to_value(&self) -> StoreValue {
        StoreValue {
            siblings: self.siblings.clone(),
            context: self.context(),
        }
    }
}

/// Shared store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Slot>>,
    next_version: AtomicU64,
    batches: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the batch after the next `successes` successful batches fail with
    /// a `Store` error, once. Nothing in the failing batch is applied.
    pub fn fail_batch_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    /// Number of batches applied successfully so far.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of keys currently holding at least one sibling.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_injected_failure(&self) -> bool {
        let mut fail_after = self.fail_after.lock();
        match fail_after.as_mut() {
            Some(0) => {
                *fail_after = None;
                true
            }
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        }
    }

    /// Compute the slot that results from writing `value` against `context`.
    fn write_slot(
        &self,
        key: &str,
        current: Option<&Slot>,
        value: &str,
        context: &Context,
    ) -> Result<Slot> {
        match current {
            None if context.is_empty() => Ok(Slot {
                siblings: vec![value.to_string()],
                version: self.bump(),
            }),
            None => Err(TrellisError::Conflict {
                key: key.to_string(),
            }),
            Some(slot) if context.is_empty() => {
                let mut siblings = slot.siblings.clone();
                if !siblings.iter().any(|s| s == value) {
                    siblings.push(value.to_string());
                }
                Ok(Slot {
                    siblings,
                    version: self.bump(),
                })
            }
            Some(slot) if slot.context() == *context => Ok(Slot {
                siblings: vec![value.to_string()],
                version: self.bump(),
            }),
            Some(_) => Err(TrellisError::Conflict {
                key: key.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<Vec<Option<StoreValue>>> {
        let data = self.data.read();
        Ok(keys
            .iter()
            .map(|key| data.get(key).map(Slot::to_value))
            .collect())
    }

    async fn put(&self, key: &str, value: &str, context: &Context) -> Result<()> {
        let mut data = self.data.write();
        let slot = self.write_slot(key, data.get(key), value, context)?;
        data.insert(key.to_string(), slot);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if self.take_injected_failure() {
            tracing::warn!(ops = ops.len(), "Injected batch failure");
            return Err(TrellisError::Store("injected batch failure".into()));
        }

        let mut data = self.data.write();

        // Stage every touched key so a conflict leaves the map untouched.
        let mut staged: HashMap<String, Option<Slot>> = HashMap::new();
        for op in &ops {
            let key = op.key();
            let current = match staged.get(key) {
                Some(slot) => slot.clone(),
                None => data.get(key).cloned(),
            };
            let next = match op {
                BatchOp::Put { value, context, .. } => {
                    Some(self.write_slot(key, current.as_ref(), value, context)?)
                }
                BatchOp::Delete { .. } => None,
            };
            staged.insert(key.to_string(), next);
        }

        for (key, slot) in staged {
            match slot {
                Some(slot) => {
                    data.insert(key, slot);
                }
                None => {
                    data.remove(&key);
                }
            }
        }

        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_matches(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        let data = self.data.read();
        Ok(data
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, slot)| !slot.siblings.is_empty())
            .map(|(key, slot)| StoreEntry {
                key: key.clone(),
                value: slot.to_value(),
            })
            .collect())
    }

    async fn delete(&self, key: &str, _context: &Context) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(store: &MemoryStore, key: &str) -> Option<StoreValue> {
        store.get_one(key).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put("k", "v1", &Context::empty()).await.unwrap();

        let value = read(&store, "k").await.unwrap();
        assert_eq!(value.siblings, vec!["v1"]);
        assert!(!value.context.is_empty());
        assert!(read(&store, "missing").await.is_none());
    }

    #[tokio::test]
    async fn test_put_with_current_context_replaces_siblings() {
        let store = MemoryStore::new();
        store.put("k", "v1", &Context::empty()).await.unwrap();
        store.put("k", "v2", &Context::empty()).await.unwrap();

        let value = read(&store, "k").await.unwrap();
        assert_eq!(value.siblings, vec!["v1", "v2"]);

        store.put("k", "merged", &value.context).await.unwrap();
        assert_eq!(read(&store, "k").await.unwrap().siblings, vec!["merged"]);
    }

    #[tokio::test]
    async fn test_stale_context_conflicts() {
        let store = MemoryStore::new();
        store.put("k", "v1", &Context::empty()).await.unwrap();
        let stale = read(&store, "k").await.unwrap().context;
        store.put("k", "v2", &stale).await.unwrap();

        let err = store.put("k", "v3", &stale).await.unwrap_err();
        assert!(matches!(err, TrellisError::Conflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(read(&store, "k").await.unwrap().siblings, vec!["v2"]);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryStore::new();
        store.put("a", "old", &Context::empty()).await.unwrap();
        let stale = Context::new("999");

        let result = store
            .batch(vec![
                BatchOp::put("b", "new", Context::empty()),
                BatchOp::put("a", "conflicting", stale),
            ])
            .await;

        assert!(result.is_err());
        assert!(read(&store, "b").await.is_none());
        assert_eq!(store.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_put_then_delete_same_key() {
        let store = MemoryStore::new();
        store
            .batch(vec![
                BatchOp::put("a", "1", Context::empty()),
                BatchOp::delete("a"),
            ])
            .await
            .unwrap();
        assert!(read(&store, "a").await.is_none());
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_get_matches_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for key in ["p.b", "p.a", "q.a", "p", "o.z"] {
            store.put(key, key, &Context::empty()).await.unwrap();
        }

        let keys: Vec<String> = store
            .get_matches("p.")
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(keys, vec!["p.a", "p.b"]);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_batch_after(1);

        store
            .batch(vec![BatchOp::put("a", "1", Context::empty())])
            .await
            .unwrap();
        let err = store
            .batch(vec![BatchOp::put("b", "1", Context::empty())])
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Store(_)));
        store
            .batch(vec![BatchOp::put("c", "1", Context::empty())])
            .await
            .unwrap();

        assert!(read(&store, "b").await.is_none());
        assert_eq!(store.batch_count(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_ignores_context() {
        let store = MemoryStore::new();
        store.put("k", "v", &Context::empty()).await.unwrap();
        store.delete("k", &Context::new("stale")).await.unwrap();
        assert!(store.is_empty());
    }
}
