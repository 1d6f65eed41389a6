//! Record Cache
//!
//! A second-level object cache on top of [`Table`]: keys map to shared
//! [`Record`]s, and every `put` opportunistically keeps the cache near its
//! configured size and free of stale records.
//!
//! # Eviction and Expiration
//!
//! There is no global LRU list. Housekeeping piggybacks on `put`, throttled per
//! thread so that a single thread runs at most one pass every few clock ticks:
//!
//! - **Eviction** (at most every 7 ticks, only while over `max_elements`)
//!   samples the table for the least valuable records, ranked by
//!   [`Record::eviction_value`], and removes them.
//! - **Expiration** (at most every 23 ticks) samples the table with expired
//!   records ranked first and removes the expired prefix.
//! - **Sweeping** walks a sixteenth of the table per step with a cursor
//!   shared by all threads (see [`Table::sweep`]), removing every expired
//!   record it meets. A step runs before eviction when the cache is more than
//!   64 records over its limit, and after an expiration pass that left the
//!   cache over its limit. Once a sweep has started, both points keep
//!   advancing it until it reaches the end of the table.
//!
//! A record expires when it was not accessed for `expiration` ticks or was
//! stored more than `4 * expiration` ticks ago. Lookups that find an expired
//! record remove it and report a miss.
//!
//! # Array Recycling
//!
//! Records own flat slot arrays drawn from the cache's [`Allocator`]. When the
//! cache drops the last reference to a record it returns the array to the
//! allocator, so steady-state churn reuses arrays instead of allocating.
//!
//! # Example
//!
//! ```
//! use closed_table::config::RecordCacheConfig;
//! use closed_table::{ClassId, RecordCache};
//!
//! let cache: RecordCache<u64, String> = RecordCache::new(RecordCacheConfig::new(1000));
//! let mut record = cache.new_record(ClassId(1), 1, 4);
//! record.set(cache.allocator(), 0, Some("alice".to_string()));
//! cache.put(7, record);
//!
//! let found = cache.get(&7).unwrap();
//! assert_eq!(found.get(0), Some(&"alice".to_string()));
//! assert_eq!(found.hits(), 1);
//! ```

use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tracing::debug;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

use crate::allocator::Allocator;
use crate::clock::{Clock, MonotonicClock};
use crate::config::RecordCacheConfig;
use crate::metrics::{CacheMetrics, RecordCacheMetrics, TableMetrics};
use crate::record::{ClassId, Record};
use crate::table::Table;

/// Minimum ticks between two eviction passes of one thread.
const MAX_EVICTION: i64 = 7;
/// Minimum ticks between two expiration passes of one thread.
const MAX_EXPIRATION: i64 = 23;

/// Excess over `max_elements` that makes a due eviction sweep first.
const SWEEP_EXCESS: usize = 64;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THROTTLES: RefCell<HashMap<u64, Throttle>> = RefCell::new(HashMap::new());
}

/// When the current thread last ran housekeeping for one cache.
#[derive(Clone, Copy, Debug)]
struct Throttle {
    evicted_at: u32,
    expired_at: u32,
}

#[inline]
fn ticks_since(now: u32, then: u32) -> i64 {
    i64::from(now) - i64::from(then)
}

/// Table value: a record plus the allocator its array returns to.
struct Resident<T> {
    record: Arc<Record<T>>,
    allocator: Arc<Allocator<T>>,
}

impl<T> Clone for Resident<T> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            allocator: Arc::clone(&self.allocator),
        }
    }
}

impl<T> Drop for Resident<T> {
    fn drop(&mut self) {
        if let Some(record) = Arc::get_mut(&mut self.record) {
            self.allocator.offer(record.take_slots());
        }
    }
}

/// A concurrent cache of [`Record`]s with sampled eviction and expiration.
pub struct RecordCache<K, T, S = DefaultHashBuilder> {
    table: Table<K, Resident<T>, S>,
    allocator: Arc<Allocator<T>>,
    clock: Arc<dyn Clock>,
    config: RecordCacheConfig,
    metrics: RecordCacheMetrics,
    id: u64,
}

impl<K, T> RecordCache<K, T, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Creates a cache running on a [`MonotonicClock`].
    pub fn new(config: RecordCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Creates a cache stamping records with `clock`.
    pub fn with_clock(config: RecordCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::init_with_hasher(config, DefaultHashBuilder::default(), clock)
    }
}

impl<K, T, S> RecordCache<K, T, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Creates a cache with a custom hash builder and clock.
    pub fn init_with_hasher(
        config: RecordCacheConfig,
        hash_builder: S,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table: Table::init_with_hasher(config.table(), hash_builder),
            allocator: Arc::new(Allocator::new(config.max_pooled())),
            clock,
            config,
            metrics: RecordCacheMetrics::default(),
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Current clock tick.
    #[inline]
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    /// The allocator records of this cache draw their arrays from.
    pub fn allocator(&self) -> &Allocator<T> {
        &self.allocator
    }

    /// Creates an empty record for this cache with room for `capacity` fields.
    pub fn new_record(&self, class: ClassId, version: u64, capacity: usize) -> Record<T> {
        Record::new(&self.allocator, class, version, capacity, self.now())
    }

    /// Stores `record` under `key`, replacing any previous record.
    ///
    /// The record's stamps are reset to the current tick. May run an eviction
    /// or expiration pass afterwards.
    pub fn put(&self, key: K, record: Record<T>) {
        let now = self.now();
        record.refresh(now);
        let resident = Resident {
            record: Arc::new(record),
            allocator: Arc::clone(&self.allocator),
        };
        self.table.put(key, resident);
        self.metrics.record_put();
        self.evict_or_expire(now);
    }

    /// Looks up `key`, counting a hit on the record if it is still fresh.
    ///
    /// An expired record is removed and reported as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<Record<T>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let now = self.now();
        match self.table.get_with(key, |resident| Arc::clone(&resident.record)) {
            Some(record) if !record.is_expired(now, self.config.expiration()) => {
                record.touch(now);
                self.metrics.record_hit();
                Some(record)
            }
            Some(_) => {
                self.discard(key);
                self.metrics.record_miss();
                None
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Returns `true` if `key` is cached, touching its record.
    ///
    /// Expiration is not checked and no hit or miss is counted.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let now = self.now();
        self.table
            .get_with(key, |resident| resident.record.touch(now))
            .is_some()
    }

    /// Removes `key`, returning `true` if it was cached.
    pub fn evict<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.discard(key)
    }

    /// Removes every key in `keys`, returning how many were cached.
    pub fn evict_all<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter().filter(|key| self.discard(*key)).count()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.table.clear();
        debug!(cache = self.id, "cleared record cache");
    }

    fn discard<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let removed = self.table.remove(key).is_some();
        if removed {
            self.metrics.record_removal();
        }
        removed
    }

    fn throttle(&self, now: u32) -> Throttle {
        THROTTLES.with(|throttles| {
            *throttles.borrow_mut().entry(self.id).or_insert(Throttle {
                evicted_at: now,
                expired_at: now,
            })
        })
    }

    fn store_throttle(&self, throttle: Throttle) {
        THROTTLES.with(|throttles| {
            throttles.borrow_mut().insert(self.id, throttle);
        });
    }

    /// Runs at most one housekeeping pass, if this thread is due for one.
    fn evict_or_expire(&self, now: u32) {
        let mut throttle = self.throttle(now);
        if ticks_since(now, throttle.evicted_at) > MAX_EVICTION {
            let max = self.config.max_elements();
            let mut size = self.table.len();
            if size > max.saturating_add(SWEEP_EXCESS) || self.table.sweep_pending() {
                self.sweep_expired();
                size = self.table.len();
            }
            if size > max {
                self.perform_eviction(size - max);
                let now = self.now();
                throttle.evicted_at = now;
                let jitter = rand::thread_rng().gen_range(0..MAX_EVICTION as u32 / 2);
                throttle.expired_at = now.saturating_add(jitter);
                self.store_throttle(throttle);
                return;
            }
        }
        if ticks_since(now, throttle.expired_at) > MAX_EXPIRATION {
            self.perform_expiration();
            let jitter = rand::thread_rng().gen_range(0..MAX_EXPIRATION as u32 / 3);
            throttle.expired_at = self.now().saturating_add(jitter);
            self.store_throttle(throttle);
        }
    }

    /// Removes about `delta` of the least valuable records, and at least
    /// `max(8, max_elements / 2048)`.
    fn perform_eviction(&self, delta: usize) {
        let started = Instant::now();
        let requested = delta.max(8.max(self.config.max_elements() >> 11));
        let keys = self.table.expirable(requested, |a, b| {
            a.record.eviction_value().cmp(&b.record.eviction_value())
        });
        let evicted = keys.iter().filter(|key| self.discard(*key)).count();
        let elapsed = started.elapsed();
        self.metrics.record_eviction(elapsed, evicted);
        debug!(
            cache = self.id,
            requested,
            evicted,
            elapsed_us = elapsed.as_micros() as u64,
            "eviction pass"
        );
    }

    /// Samples for expired records and removes them.
    fn perform_expiration(&self) {
        let started = Instant::now();
        let now = self.now();
        let expiration = self.config.expiration();
        let delta = self.table.len().saturating_sub(self.config.max_elements());
        let requested = delta.min(128).max(16.max(self.config.max_elements() >> 10));

        // expired first
        let keys = self.table.expirable(requested, |a, b| {
            let a = a.record.is_expired(now, expiration);
            let b = b.record.is_expired(now, expiration);
            b.cmp(&a)
        });
        let mut expired = 0;
        for key in &keys {
            match self
                .table
                .get_with(key, |resident| resident.record.is_expired(now, expiration))
            {
                Some(true) => {
                    if self.discard(key) {
                        expired += 1;
                    }
                }
                Some(false) => break,
                None => {}
            }
        }
        let elapsed = started.elapsed();
        self.metrics.record_expiration(elapsed, expired);
        debug!(
            cache = self.id,
            requested,
            expired,
            elapsed_us = elapsed.as_micros() as u64,
            "expiration pass"
        );
        if delta > expired || self.table.sweep_pending() {
            self.sweep_expired();
        }
    }

    /// Advances the shared sweep by a sixteenth of the table, removing the
    /// expired records it passes. Does nothing while another thread sweeps.
    fn sweep_expired(&self) {
        let started = Instant::now();
        let now = self.now();
        let expiration = self.config.expiration();
        let budget = (self.table.capacity() >> 4).max(1);
        let Some(sweep) = self
            .table
            .sweep(budget, |_, resident| resident.record.is_expired(now, expiration))
        else {
            return;
        };
        self.metrics.record_removals(sweep.removed);
        let elapsed = started.elapsed();
        self.metrics.record_expiration(elapsed, sweep.removed);
        debug!(
            cache = self.id,
            budget,
            expired = sweep.removed,
            pending = sweep.pending,
            elapsed_us = elapsed.as_micros() as u64,
            "expiration sweep"
        );
    }
}

impl<K, T, S> RecordCache<K, T, S> {
    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no record is cached.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &RecordCacheConfig {
        &self.config
    }

    /// Request and housekeeping counters.
    pub fn cache_metrics(&self) -> &RecordCacheMetrics {
        &self.metrics
    }

    /// Structural counters of the underlying table.
    pub fn table_metrics(&self) -> &TableMetrics {
        self.table.table_metrics()
    }
}

impl<K, T, S> CacheMetrics for RecordCache<K, T, S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.to_btreemap();
        for (name, value) in self.table.metrics() {
            metrics.insert(format!("table_{name}"), value);
        }
        metrics.insert("max_elements".to_string(), self.config.max_elements() as f64);
        metrics.insert("pooled_arrays".to_string(), self.allocator.pooled() as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "RecordCache"
    }
}

impl<K, T, S> fmt::Debug for RecordCache<K, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCache")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("config", &self.config)
            .field("allocator", &self.allocator)
            .finish()
    }
}

impl<K, T, S> Drop for RecordCache<K, T, S> {
    fn drop(&mut self) {
        let id = self.id;
        // other threads keep their entry until they exit
        let _ = THROTTLES.try_with(|throttles| throttles.borrow_mut().remove(&id));
    }
}
