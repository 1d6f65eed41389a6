//! Record Cache Metrics
//!
//! Request and housekeeping counters for [`RecordCache`](crate::RecordCache):
//! hits, misses, puts and removals, plus how many records eviction and
//! expiration passes discarded and how long those passes took.

use super::CacheMetrics;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared counters of a [`RecordCache`](crate::RecordCache).
///
/// Updated with relaxed atomics from every thread using the cache.
#[derive(Debug, Default)]
pub struct RecordCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    evicted: AtomicU64,
    evictions: AtomicU64,
    eviction_nanos: AtomicU64,
    expired: AtomicU64,
    expirations: AtomicU64,
    expiration_nanos: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[inline]
fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl RecordCacheMetrics {
    pub(crate) fn record_hit(&self) {
        bump(&self.hits, 1);
    }

    pub(crate) fn record_miss(&self) {
        bump(&self.misses, 1);
    }

    pub(crate) fn record_put(&self) {
        bump(&self.puts, 1);
    }

    pub(crate) fn record_removal(&self) {
        bump(&self.removals, 1);
    }

    pub(crate) fn record_removals(&self, removed: usize) {
        bump(&self.removals, removed as u64);
    }

    pub(crate) fn record_eviction(&self, elapsed: Duration, evicted: usize) {
        bump(&self.evictions, 1);
        bump(&self.evicted, evicted as u64);
        bump(&self.eviction_nanos, nanos(elapsed));
    }

    pub(crate) fn record_expiration(&self, elapsed: Duration, expired: usize) {
        bump(&self.expirations, 1);
        bump(&self.expired, expired as u64);
        bump(&self.expiration_nanos, nanos(elapsed));
    }

    /// Lookups that found a fresh record.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing, including ones that found an expired record.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Records stored.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Records removed for any reason: explicit evicts, eviction and
    /// expiration passes, sweeps, and expired records found by lookups.
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    /// Records discarded by eviction passes.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Number of eviction passes run.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Records discarded by expiration passes and sweeps.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Number of expiration passes and sweep steps run.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Total time spent in eviction passes.
    pub fn eviction_time(&self) -> Duration {
        Duration::from_nanos(self.eviction_nanos.load(Ordering::Relaxed))
    }

    /// Total time spent in expiration passes.
    pub fn expiration_time(&self) -> Duration {
        Duration::from_nanos(self.expiration_nanos.load(Ordering::Relaxed))
    }

    /// Fraction of lookups that hit, or 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let requests = hits + self.misses();
        if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("cache_hits".to_string(), self.hits() as f64);
        metrics.insert("cache_misses".to_string(), self.misses() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("puts".to_string(), self.puts() as f64);
        metrics.insert("removals".to_string(), self.removals() as f64);

        metrics.insert("evicted".to_string(), self.evicted() as f64);
        metrics.insert("evictions".to_string(), self.evictions() as f64);
        metrics.insert(
            "eviction_time_ms".to_string(),
            self.eviction_time().as_secs_f64() * 1000.0,
        );
        metrics.insert("expired".to_string(), self.expired() as f64);
        metrics.insert("expirations".to_string(), self.expirations() as f64);
        metrics.insert(
            "expiration_time_ms".to_string(),
            self.expiration_time().as_secs_f64() * 1000.0,
        );
        metrics
    }
}

impl CacheMetrics for RecordCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "RecordCache"
    }
}
