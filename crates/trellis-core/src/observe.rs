//! Optional metrics instrumentation for Trellis.
//!
//! When the `observe` feature is enabled, registry and index operations emit
//! counters and histograms via the [`metrics`] crate. A downstream
//! application must install a metrics recorder to collect the data.
//!
//! Without the feature every function in this module is a no-op.

use std::time::Duration;

/// Record a stripe-lock acquisition wait time.
///
/// - `trellis.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("trellis.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a cache hit or miss.
///
/// - `trellis.cache.lookups_total` – counter with `cache` and `result` labels
#[inline]
pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("trellis.cache.lookups_total", "cache" => cache, "result" => result)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (cache, hit);
    }
}

/// Record a subscription being registered.
///
/// - `trellis.registry.subscribes_total` – counter with `outcome` label
#[inline]
pub fn record_subscribe(success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("trellis.registry.subscribes_total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = success;
    }
}

/// Record a subscription being removed.
///
/// - `trellis.registry.unsubscribes_total` – counter with `outcome` label
#[inline]
pub fn record_unsubscribe(success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("trellis.registry.unsubscribes_total", "outcome" => outcome)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = success;
    }
}

/// Record a subscriber lookup for one event.
///
/// - `trellis.registry.match_duration_seconds` – histogram
/// - `trellis.registry.matched_total` – counter of subscriptions that fired
#[inline]
pub fn record_match(duration: Duration, matched: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("trellis.registry.match_duration_seconds")
            .record(duration.as_secs_f64());
        metrics::counter!("trellis.registry.matched_total").increment(matched as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, matched);
    }
}

/// Record a batch written to the shared store.
///
/// - `trellis.store.batches_total` – counter with `outcome` label
/// - `trellis.store.batch_duration_seconds` – histogram
#[inline]
pub fn record_store_batch(duration: Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("trellis.store.batches_total", "outcome" => outcome).increment(1);
        metrics::histogram!("trellis.store.batch_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}
