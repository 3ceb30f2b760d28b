//! Stripe-based async lock manager keyed by subscription id
//!
//! A key hashes to one stripe. Holding a key's stripe serializes every
//! subscribe/unsubscribe of that key across its store writes. Multi-key
//! acquisition sorts stripes first, so overlapping bulk operations cannot
//! deadlock.

use crate::error::{Result, TrellisError};
use crate::observe;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use xxhash_rust::xxh3::xxh3_64;

/// Default lock acquisition timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Lock manager for per-key critical sections that span `.await` points
pub struct LockManager {
    stripes: Vec<Mutex<()>>,
    default_timeout: Duration,
}

/// Guard holding one or more stripes; released in reverse order on drop
pub struct KeyLockGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyLockGuard<'_> {
    /// Number of distinct stripes held.
    pub fn stripes_held(&self) -> usize {
        self._guards.len()
    }
}

impl LockManager {
    /// # Panics
    ///
    /// Panics if `num_stripes` is 0.
    pub fn new(num_stripes: usize, default_timeout: Duration) -> Self {
        assert!(num_stripes > 0, "num_stripes must be positive");
        Self {
            stripes: (0..num_stripes).map(|_| Mutex::new(())).collect(),
            default_timeout,
        }
    }

    pub fn with_stripes(num_stripes: usize) -> Self {
        Self::new(num_stripes, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        (xxh3_64(key) as usize) % self.stripes.len()
    }

    /// Lock a single key.
    pub async fn acquire(&self, key: &str) -> Result<KeyLockGuard<'_>> {
        self.acquire_keys(&[key]).await
    }

    /// Lock every key, taking stripes in ascending index order.
    ///
    /// Fails with `LockTimeout` if any stripe is not obtained within the
    /// default timeout; stripes already taken are released.
    pub async fn acquire_keys<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<KeyLockGuard<'_>> {
        self.acquire_keys_with_timeout(keys, self.default_timeout)
            .await
    }

    pub async fn acquire_keys_with_timeout<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        timeout: Duration,
    ) -> Result<KeyLockGuard<'_>> {
        let stripe_indices: BTreeSet<usize> =
            keys.iter().map(|k| self.stripe_index(k.as_ref())).collect();

        let started = Instant::now();
        let mut guards = Vec::with_capacity(stripe_indices.len());

        for idx in stripe_indices {
            match tokio::time::timeout(timeout, self.stripes[idx].lock()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    tracing::warn!(
                        stripe = idx,
                        held = guards.len(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Timed out acquiring key lock"
                    );
                    return Err(TrellisError::LockTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }

        observe::record_lock_wait(started.elapsed());
        Ok(KeyLockGuard { _guards: guards })
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_same_key_maps_to_same_stripe() {
        let lm = LockManager::with_stripes(64);
        assert_eq!(lm.stripe_index(b"sub-1"), lm.stripe_index(b"sub-1"));
        assert!(lm.stripe_index(b"sub-2") < 64);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_keys() {
        let lm = LockManager::with_stripes(64);
        let guard = lm.acquire_keys(&["a", "a", "a"]).await.unwrap();
        assert_eq!(guard.stripes_held(), 1);
        drop(guard);

        let guard = lm.acquire_keys::<&str>(&[]).await.unwrap();
        assert_eq!(guard.stripes_held(), 0);
    }

    #[tokio::test]
    async fn test_same_key_times_out_while_held() {
        let lm = Arc::new(LockManager::new(8, Duration::from_millis(30)));
        let _held = lm.acquire("sub-1").await.unwrap();

        let lm2 = lm.clone();
        let timed_out = tokio::spawn(async move {
            matches!(
                lm2.acquire("sub-1").await,
                Err(TrellisError::LockTimeout { .. })
            )
        })
        .await
        .unwrap();
        assert!(timed_out);
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let lm = Arc::new(LockManager::with_stripes(8));
        let held = lm.acquire("sub-1").await.unwrap();

        let lm2 = lm.clone();
        let waiter = tokio::spawn(async move {
            let _guard = lm2.acquire("sub-1").await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reverse_order_bulk_acquisition_does_not_deadlock() {
        let lm = Arc::new(LockManager::with_stripes(16));

        let tasks: Vec<_> = [["a", "b"], ["b", "a"]]
            .into_iter()
            .map(|keys| {
                let lm = lm.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let _guard = lm.acquire_keys(&keys).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("no deadlock")
                .unwrap();
        }
    }
}
