//! Concurrent Open-Addressing Table
//!
//! A segmented hash table built for a small memory footprint and little
//! allocation churn under concurrent load. Entries live directly in flat
//! per-segment arrays (no per-entry node besides the boxed key and value),
//! reads are lock-free, and writers lock small groups of slots.
//!
//! # How It Works
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Table                                  │
//! │                                                                      │
//! │  mix(hash(key) ^ seed)  ──▶  high bits pick the segment              │
//! │                              low bits pick the start position        │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐     ┌──────────────┐              │
//! │  │  Segment 0   │ │  Segment 1   │ ... │  Segment N-1 │              │
//! │  │ k v k v k v  │ │ k v k v k v  │     │ k v k v k v  │              │
//! │  │ lock words   │ │ lock words   │     │ lock words   │              │
//! │  │ gate (Mutex) │ │ gate (Mutex) │     │ gate (Mutex) │              │
//! │  └──────────────┘ └──────────────┘     └──────────────┘              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **get** never locks: it validates every slot it reads against the lock
//!   word of the slot's group and retries if a writer interfered.
//! - **put / remove** lock the groups their probe passes through. A remove
//!   closes the gap it leaves (close deletion); when that is blocked it leaves
//!   a tombstone which a later expunge pass collapses.
//! - **resize** replaces a whole segment with one of twice the length. Other
//!   segments are unaffected.
//!
//! Retired segments, keys and values are reclaimed with `crossbeam-epoch`, so
//! readers never observe freed memory.
//!
//! # Eviction Sampling
//!
//! [`Table::expirable`] returns keys of approximately the `k` least valuable
//! entries by sampling `17 * k` live entries from up to four random segments
//! and selecting the `k` smallest (see [`least_of`](crate::least_of)). It never
//! blocks and never touches more than those segments.
//!
//! # Sweeping
//!
//! [`Table::sweep`] walks the whole table in bounded steps, removing entries
//! that match a predicate. The position reached is kept in a shared cursor, so
//! successive calls (from any thread) resume where the last one stopped; a
//! compare-and-swap makes sure only one thread advances it at a time.
//!
//! # Example
//!
//! ```
//! use closed_table::config::TableConfig;
//! use closed_table::Table;
//!
//! let table: Table<&str, u32> = Table::init(TableConfig::new().with_segments(4), None);
//! assert_eq!(table.put("a", 1), None);
//! assert_eq!(table.put("a", 2), Some(1));
//! assert_eq!(table.get("a"), Some(2));
//! assert_eq!(table.remove("a"), Some(2));
//! assert!(table.is_empty());
//! ```

use std::borrow::Borrow;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

use crate::backoff::Backoff;
use crate::config::TableConfig;
use crate::metrics::{CacheMetrics, TableMetrics};
use crate::segment::{KeyNode, Lookup, Put, Remove, Retry, Segment, MAX_SEGMENT_LENGTH};
use crate::select::least_of;

/// Entries drawn per requested eviction candidate.
const SAMPLE_FACTOR: usize = 17;

/// Segments probed by one [`Table::expirable`] call.
const SAMPLED_SEGMENTS: usize = 4;

/// Sweep cursor: no sweep in progress.
const SWEEP_IDLE: u64 = 0;

/// Sweep cursor: a thread is advancing the sweep.
const SWEEP_BUSY: u64 = u64::MAX;

/// Encodes the next pair to sweep; never yields the two reserved states.
#[inline]
fn sweep_cursor(segment: usize, pair: usize) -> u64 {
    (((segment as u64) << 32) | pair as u64) + 1
}

#[inline]
fn sweep_position(cursor: u64) -> (usize, usize) {
    let at = cursor - 1;
    ((at >> 32) as usize, (at & u64::from(u32::MAX)) as usize)
}

/// Holds the sweep cursor; publishes the next state when dropped.
struct SweepClaim<'a> {
    cursor: &'a AtomicU64,
    next: u64,
}

impl Drop for SweepClaim<'_> {
    fn drop(&mut self) {
        self.cursor.store(self.next, Ordering::Release);
    }
}

/// Progress of one [`Table::sweep`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    /// Entries removed by this call.
    pub removed: usize,
    /// Whether the sweep stopped before the end of the table.
    pub pending: bool,
}

/// Single-word Wang/Jenkins avalanche.
#[inline]
fn mix(mut h: u32) -> u32 {
    h = h.wrapping_add((h << 15) ^ 0xffff_cd7d);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));
    h ^ (h >> 16)
}

/// A concurrent open-addressing hash table.
///
/// `Table` is `Send + Sync` and is meant to be shared through an `Arc`.
/// Lookups return clones of the stored values; use
/// [`get_with`](Self::get_with) to borrow instead.
pub struct Table<K, V, S = DefaultHashBuilder> {
    segments: Box<[Atomic<Segment<K, V>>]>,
    shift: u32,
    seed: u32,
    segment_length: usize,
    load_factor: f32,
    hash_builder: S,
    metrics: TableMetrics,
    sweep: AtomicU64,
}

impl<K, V> Table<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a table with the default configuration.
    pub fn new() -> Self {
        Self::init(TableConfig::new(), None)
    }

    /// Creates a table from a configuration with an optional hasher.
    ///
    /// # Arguments
    ///
    /// * `config` - Segment count, segment length, load factor and hash seed
    /// * `hasher` - Optional custom hash builder. If `None`, uses `DefaultHashBuilder`
    pub fn init(config: TableConfig, hasher: Option<DefaultHashBuilder>) -> Self {
        Self::init_with_hasher(config, hasher.unwrap_or_default())
    }
}

impl<K, V> Default for Table<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Table<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Creates a table with a custom hash builder.
    pub fn init_with_hasher(config: TableConfig, hash_builder: S) -> Self {
        let segments: Vec<_> = (0..config.segments())
            .map(|_| {
                Atomic::new(Segment::new(
                    config.segment_length(),
                    config.load_factor(),
                    Arc::new(Mutex::new(())),
                ))
            })
            .collect();
        Self {
            shift: (segments.len() as u32).leading_zeros(),
            segments: segments.into_boxed_slice(),
            seed: config
                .hash_seed()
                .unwrap_or_else(|| rand::thread_rng().gen()),
            segment_length: config.segment_length(),
            load_factor: config.load_factor(),
            hash_builder,
            metrics: TableMetrics::default(),
            sweep: AtomicU64::new(SWEEP_IDLE),
        }
    }

    /// Hashes `key` with the table's hasher and seed; the low bit is clear.
    fn hash<Q>(&self, key: &Q) -> u32
    where
        Q: ?Sized + Hash,
    {
        let h = self.hash_builder.hash_one(key);
        mix((h ^ (h >> 32)) as u32 ^ self.seed) & !1
    }

    #[inline]
    fn segment_index(&self, hash: u32) -> usize {
        (hash >> self.shift) as usize & (self.segments.len() - 1)
    }

    /// Returns the table slot for `hash` and the segment currently in it.
    fn segment<'g>(
        &self,
        hash: u32,
        guard: &'g Guard,
    ) -> (&Atomic<Segment<K, V>>, &'g Segment<K, V>) {
        let slot = &self.segments[self.segment_index(hash)];
        // SAFETY: slots are never null, and replaced segments are retired
        // through the epoch collector while `guard` is pinned.
        let segment = unsafe { slot.load(Ordering::Acquire, guard).deref() };
        (slot, segment)
    }

    /// Retrieves a value and applies `f` to it without cloning.
    ///
    /// `f` runs while the calling thread is pinned, which delays reclamation
    /// of retired entries; keep it short.
    pub fn get_with<Q, F, R>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> R,
    {
        let hash = self.hash(key);
        let guard = epoch::pin();
        let (slot, mut segment) = self.segment(hash, &guard);
        let mut expunge = true;
        let mut backoff = Backoff::new();
        loop {
            match segment.get(hash, key, expunge, &guard) {
                Lookup::Found(value) => return Some(f(value)),
                Lookup::Missing => return None,
                Lookup::Moved => {
                    let current = slot.load(Ordering::Acquire, &guard);
                    if std::ptr::eq(current.as_raw(), segment) {
                        // successor not installed yet
                        backoff.snooze();
                    } else {
                        // SAFETY: see `segment`.
                        segment = unsafe { current.deref() };
                    }
                }
                Lookup::Tombstones => {
                    segment.expunge(&guard, &self.metrics);
                    expunge = false;
                }
                Lookup::Full => {
                    segment.resize(slot, self.load_factor, &guard, &self.metrics);
                    return None;
                }
            }
        }
    }

    /// Retrieves a clone of the value stored for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Returns `true` if the table holds `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_with(key, |_| ()).is_some()
    }

    /// Inserts or replaces the value for `key`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if the key's segment has reached its maximum length and has no
    /// free slot left.
    pub fn put(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.hash(&key);
        let mut node = Owned::new(KeyNode { hash, key });
        let mut value = Owned::new(value);
        let guard = epoch::pin();
        let mut backoff = Backoff::new();
        loop {
            let (slot, segment) = self.segment(hash, &guard);
            if segment.is_replaced(&guard) {
                drop(segment.gate().lock());
                continue;
            }
            match segment.put(node, value, &guard, &self.metrics) {
                Put::Inserted { grow } => {
                    if grow {
                        segment.resize(slot, self.load_factor, &guard, &self.metrics);
                    }
                    return None;
                }
                Put::Replaced(old) => {
                    // SAFETY: swapped out under the group lock, so no new
                    // reader can reach it; current readers are covered by the
                    // deferred destruction.
                    let previous = unsafe { old.deref() }.clone();
                    unsafe { guard.defer_destroy(old) };
                    return Some(previous);
                }
                Put::Retry(n, v, why) => {
                    node = n;
                    value = v;
                    match why {
                        Retry::Moved => drop(segment.gate().lock()),
                        Retry::Full if segment.len() >= MAX_SEGMENT_LENGTH => {
                            panic!("segment reached its maximum length and has no free slot")
                        }
                        Retry::Crowded | Retry::Full => {
                            if !segment.resize(slot, self.load_factor, &guard, &self.metrics) {
                                backoff.snooze();
                            }
                        }
                    }
                }
            }
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.remove_with(key, V::clone)
    }

    /// Removes `key`, applying `f` to the value on its way out.
    fn remove_with<Q, F, R>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> R,
    {
        let hash = self.hash(key);
        let guard = epoch::pin();
        loop {
            let (_, segment) = self.segment(hash, &guard);
            if segment.is_replaced(&guard) {
                drop(segment.gate().lock());
                continue;
            }
            match segment.remove(hash, key, &guard, &self.metrics) {
                Remove::Removed(k, v) => {
                    // SAFETY: both were unlinked under the group lock.
                    let previous = f(unsafe { v.deref() });
                    unsafe {
                        guard.defer_destroy(k);
                        guard.defer_destroy(v);
                    }
                    if segment.needs_expunge() {
                        segment.expunge(&guard, &self.metrics);
                    }
                    return Some(previous);
                }
                Remove::Absent => return None,
                Remove::Moved => drop(segment.gate().lock()),
            }
        }
    }

    /// Returns up to `k` keys approximating the `k` entries ranked lowest by
    /// `cmp`, in ascending order.
    ///
    /// Samples `17 * k` live entries from up to four random segments, largest
    /// first, and never blocks. Entries that are locked while sampled are
    /// skipped, so the result may hold fewer than `k` keys even when the table
    /// has more entries.
    pub fn expirable<F>(&self, k: usize, mut cmp: F) -> Vec<K>
    where
        K: Clone,
        F: FnMut(&V, &V) -> CmpOrdering,
    {
        if k == 0 {
            return Vec::new();
        }
        let sample_size = k.saturating_mul(SAMPLE_FACTOR);
        let guard = epoch::pin();
        let mut rng = rand::thread_rng();

        let picks = SAMPLED_SEGMENTS.min(self.segments.len());
        let mut chosen: Vec<&Segment<K, V>> =
            rand::seq::index::sample(&mut rng, self.segments.len(), picks)
                .iter()
                // SAFETY: see `segment`.
                .map(|i| unsafe { self.segments[i].load(Ordering::Acquire, &guard).deref() })
                .collect();
        chosen.sort_by_key(|segment| Reverse(segment.size()));

        let mut sample = Vec::with_capacity(sample_size.min(4096));
        for segment in chosen {
            if sample.len() >= sample_size {
                break;
            }
            segment.sample(&mut rng, sample_size, &mut sample, &guard);
        }

        least_of(sample, k, |a, b| cmp(a.1, b.1))
            .into_iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Advances the shared sweep by up to `budget` pairs, removing every live
    /// entry for which `expired` returns `true`.
    ///
    /// The sweep starts at the first segment, resumes wherever the previous
    /// call stopped, and starts over once it has passed the last segment.
    /// Returns `None` without doing anything while another thread is
    /// sweeping. Pairs that are locked while visited are skipped, and entries
    /// relocated by concurrent writers may be visited twice or not at all.
    pub fn sweep<F>(&self, budget: usize, mut expired: F) -> Option<Sweep>
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        let mut state = self.sweep.load(Ordering::Acquire);
        loop {
            if state == SWEEP_BUSY {
                return None;
            }
            match self.sweep.compare_exchange_weak(
                state,
                SWEEP_BUSY,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => state = current,
            }
        }
        let mut claim = SweepClaim {
            cursor: &self.sweep,
            next: SWEEP_IDLE,
        };
        let (mut segment, mut pair) = if state == SWEEP_IDLE {
            (0, 0)
        } else {
            sweep_position(state)
        };

        let mut doomed = Vec::new();
        {
            let guard = epoch::pin();
            let mut visited = 0;
            while visited < budget && segment < self.segments.len() {
                // SAFETY: see `segment`.
                let current =
                    unsafe { self.segments[segment].load(Ordering::Acquire, &guard).deref() };
                if pair >= current.len() >> 1 {
                    segment += 1;
                    pair = 0;
                    continue;
                }
                if let Some((key, value)) = current.read_pair(pair, &guard) {
                    if expired(key, value) {
                        doomed.push(key.clone());
                    }
                }
                pair += 1;
                visited += 1;
            }
        }

        let removed = doomed
            .iter()
            .filter(|key| self.remove_with(*key, |_| ()).is_some())
            .count();
        let pending = segment < self.segments.len();
        if pending {
            claim.next = sweep_cursor(segment, pair);
        }
        Some(Sweep { removed, pending })
    }

    /// Returns `true` while a sweep is under way, i.e. the last
    /// [`sweep`](Self::sweep) call stopped before the end of the table or a
    /// thread is sweeping right now.
    pub fn sweep_pending(&self) -> bool {
        self.sweep.load(Ordering::Acquire) != SWEEP_IDLE
    }

    /// Removes every entry.
    ///
    /// Each segment is swapped for a fresh one under its gate; concurrent
    /// writes to a segment being swapped may be lost.
    pub fn clear(&self) {
        let guard = epoch::pin();
        for slot in self.segments.iter() {
            // SAFETY: see `segment`.
            let gate = Arc::clone(unsafe { slot.load(Ordering::Acquire, &guard).deref() }.gate());
            let _held = gate.lock();
            // reload: a resize may have finished before the gate was taken
            let current = slot.load(Ordering::Acquire, &guard);
            let fresh = Segment::new(self.segment_length, self.load_factor, Arc::clone(&gate));
            slot.store(Owned::new(fresh), Ordering::Release);
            // SAFETY: unlinked above; its replacement is unset, so dropping
            // it frees the entries it still holds.
            unsafe { guard.defer_destroy(current) };
        }
        debug!(segments = self.segments.len(), "cleared table");
    }
}

impl<K, V, S> Table<K, V, S> {
    fn fold_segments<T>(&self, init: T, mut f: impl FnMut(T, &Segment<K, V>) -> T) -> T {
        let guard = epoch::pin();
        self.segments.iter().fold(init, |acc, slot| {
            // SAFETY: see `segment`.
            f(acc, unsafe { slot.load(Ordering::Acquire, &guard).deref() })
        })
    }

    /// Returns the number of entries.
    ///
    /// Sums per-segment counters without locking; the result is approximate
    /// while writers run.
    pub fn len(&self) -> usize {
        self.fold_segments(0usize, |n, s| n.saturating_add(s.size()))
    }

    /// Returns `true` if no segment holds an entry.
    pub fn is_empty(&self) -> bool {
        self.fold_segments(true, |empty, s| empty && s.size() == 0)
    }

    /// Returns the number of tombstones awaiting an expunge pass.
    pub fn tombstones(&self) -> usize {
        self.fold_segments(0usize, |n, s| n + s.tombstones())
    }

    /// Returns the number of key/value pairs the segments have room for.
    pub fn capacity(&self) -> usize {
        self.fold_segments(0usize, |n, s| n + (s.len() >> 1))
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the seed mixed into every hash.
    pub fn hash_seed(&self) -> u32 {
        self.seed
    }

    /// Returns the structural counters of this table.
    pub fn table_metrics(&self) -> &TableMetrics {
        &self.metrics
    }
}

impl<K, V, S> CacheMetrics for Table<K, V, S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.to_btreemap();
        metrics.insert("capacity".to_string(), self.capacity() as f64);
        metrics.insert("entries".to_string(), self.len() as f64);
        metrics.insert("segments".to_string(), self.segment_count() as f64);
        metrics.insert("tombstones".to_string(), self.tombstones() as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        self.metrics.algorithm_name()
    }
}

impl<K, V, S> fmt::Debug for Table<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("segments", &self.segments.len())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("tombstones", &self.tombstones())
            .finish()
    }
}

impl<K, V, S> Drop for Table<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no other thread uses the table.
        let guard = unsafe { epoch::unprotected() };
        for slot in self.segments.iter() {
            let segment = slot.swap(epoch::Shared::null(), Ordering::Relaxed, guard);
            if !segment.is_null() {
                // SAFETY: the table owns the installed segment.
                drop(unsafe { segment.into_owned() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::index_of;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn table(segments: usize) -> Table<u64, u64> {
        Table::init(
            TableConfig::new().with_segments(segments).with_hash_seed(0x9e37_79b9),
            None,
        )
    }

    #[test]
    fn test_mix_is_injective_on_sample() {
        // mixing is a bijection on u32, so distinct inputs stay distinct
        let outputs: std::collections::HashSet<u32> = (0..10_000u32).map(mix).collect();
        assert_eq!(outputs.len(), 10_000);
    }

    #[test]
    fn test_hash_low_bit_clear_and_segment_in_range() {
        let table = table(8);
        for key in 0..1000u64 {
            let h = table.hash(&key);
            assert_eq!(h & 1, 0);
            assert!(table.segment_index(h) < 8);
        }
    }

    #[test]
    fn test_single_segment_table() {
        let table = table(1);
        for key in 0..100 {
            table.put(key, key);
        }
        assert_eq!(table.len(), 100);
        assert_eq!(table.get(&99), Some(99));
    }

    #[test]
    fn test_put_get_remove() {
        let table = table(2);
        assert_eq!(table.put(1, 10), None);
        assert_eq!(table.put(1, 11), Some(10));
        assert_eq!(table.get(&1), Some(11));
        assert!(table.contains_key(&1));
        assert_eq!(table.remove(&1), Some(11));
        assert_eq!(table.remove(&1), None);
        assert!(!table.contains_key(&1));
        assert!(table.is_empty());
    }

    #[test]
    fn test_get_with_borrows() {
        let table: Table<String, Vec<u8>> = Table::init(TableConfig::new().with_segments(2), None);
        table.put("bytes".to_string(), vec![1, 2, 3]);
        assert_eq!(table.get_with("bytes", |v| v.len()), Some(3));
        assert_eq!(table.get_with("missing", |v| v.len()), None);
    }

    #[test]
    fn test_resize_keeps_entries() {
        let table = table(2);
        for key in 0..10_000 {
            table.put(key, key * 2);
        }
        assert_eq!(table.len(), 10_000);
        assert!(table.capacity() >= 10_000);
        assert!(table.table_metrics().resizes() > 0);
        for key in 0..10_000 {
            assert_eq!(table.get(&key), Some(key * 2));
        }
    }

    #[test]
    fn test_clear_resets_segments() {
        let table = table(4);
        for key in 0..1000 {
            table.put(key, key);
        }
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 4 * 16);
        assert_eq!(table.get(&5), None);
        table.put(5, 6);
        assert_eq!(table.get(&5), Some(6));
    }

    #[test]
    fn test_dropping_table_drops_stored_values() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Clone)]
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let table: Table<u32, Counted> = Table::init(TableConfig::new().with_segments(2), None);
        for key in 0..200 {
            assert!(table.put(key, Counted).is_none());
        }
        assert!(table.table_metrics().resizes() > 0);
        assert_eq!(DROPS.load(Ordering::Relaxed), 0);
        drop(table);
        // resized segments hand their entries over, so each value drops once
        assert_eq!(DROPS.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn test_expirable_returns_lowest() {
        let table = table(2);
        for key in 0..100 {
            table.put(key, key);
        }
        let victims = table.expirable(5, |a, b| a.cmp(b));
        assert!(!victims.is_empty());
        assert!(victims.len() <= 5);
        assert!(victims.windows(2).all(|w| w[0] <= w[1]));
        assert!(victims.iter().all(|k| table.contains_key(k)));
    }

    #[test]
    fn test_expirable_on_empty_table() {
        let table = table(4);
        assert!(table.expirable(3, |a, b| a.cmp(b)).is_empty());
        assert!(table.expirable(0, |a, b| a.cmp(b)).is_empty());
    }

    #[test]
    fn test_concurrent_puts() {
        let table = Arc::new(table(4));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..2000 {
                        table.put(t * 10_000 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 8000);
        assert_eq!(table.get(&30_001), Some(1));
    }

    fn dense_table() -> Table<u64, u64> {
        Table::init(
            TableConfig::new()
                .with_segments(1)
                .with_segment_length(64)
                .with_load_factor(1.0)
                .with_hash_seed(0x9e37_79b9),
            None,
        )
    }

    /// One key per natural position `0, 2, .., 2 * (count - 1)` of a single
    /// segment of `len` positions.
    fn keys_by_position(table: &Table<u64, u64>, len: usize, count: usize) -> Vec<u64> {
        let mut keys = vec![None; count];
        let mut found = 0;
        for key in 0u64.. {
            let position = index_of(table.hash(&key), len);
            if position < 2 * count && keys[position / 2].is_none() {
                keys[position / 2] = Some(key);
                found += 1;
                if found == count {
                    break;
                }
            }
        }
        keys.into_iter().flatten().collect()
    }

    fn only_segment<'g>(table: &Table<u64, u64>, guard: &'g Guard) -> &'g Segment<u64, u64> {
        // SAFETY: the table outlives the guard in every test using this.
        unsafe { table.segments[0].load(Ordering::Acquire, guard).deref() }
    }

    #[test]
    fn test_tombstones_from_blocked_removals_are_expunged() {
        let table = dense_table();
        // positions 0..14: all of lock group 0
        let keys = keys_by_position(&table, 64, 8);
        for &key in &keys {
            table.put(key, key);
        }
        let guard = epoch::pin();
        let segment = only_segment(&table, &guard);
        assert_eq!(segment.len(), 64);

        // with group 1 held, every gap walking up to position 16 stays behind
        assert!(segment.try_lock_group(1));
        for &key in keys[3..].iter().rev() {
            assert_eq!(table.remove(&key), Some(key));
        }
        segment.unlock_group(1);

        let metrics = table.table_metrics();
        assert_eq!(metrics.tombstones_created(), 5);
        assert_eq!(table.tombstones(), 5);
        // the fifth tombstone crossed the limit, but nothing could collapse yet
        assert_eq!(metrics.expunges(), 1);
        assert_eq!(metrics.tombstones_collapsed(), 0);

        assert_eq!(table.remove(&keys[0]), Some(keys[0]));
        assert_eq!(metrics.expunges(), 2);
        assert_eq!(metrics.tombstones_collapsed(), 5);
        assert!(table.tombstones() <= table.capacity() / 8);
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&keys[1]), Some(keys[1]));
        assert_eq!(table.get(&keys[2]), Some(keys[2]));
    }

    #[test]
    fn test_lookup_across_tombstones_expunges() {
        let table = dense_table();
        // positions 0..30: lock groups 0 and 1
        let keys = keys_by_position(&table, 64, 16);
        for &key in &keys {
            table.put(key, key);
        }
        let guard = epoch::pin();
        let segment = only_segment(&table, &guard);

        assert!(segment.try_lock_group(2));
        for &key in keys[8..].iter().rev() {
            assert_eq!(table.remove(&key), Some(key));
        }
        segment.unlock_group(2);
        assert_eq!(table.tombstones(), 8);
        let metrics = table.table_metrics();
        let expunges = metrics.expunges();
        assert_eq!(metrics.tombstones_collapsed(), 0);

        // probing from position 16 crosses all eight tombstones
        assert_eq!(table.get(&keys[8]), None);
        assert_eq!(metrics.expunges(), expunges + 1);
        assert_eq!(metrics.tombstones_collapsed(), 8);
        assert!(table.tombstones() <= table.capacity() / 8);
        assert_eq!(table.tombstones(), 0);
        assert!(keys[..8].iter().all(|key| table.get(key) == Some(*key)));
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn test_sweep_cursor_encoding() {
        for (segment, pair) in [(0, 0), (3, 17), (255, (1 << 28) - 1)] {
            let cursor = sweep_cursor(segment, pair);
            assert_ne!(cursor, SWEEP_IDLE);
            assert_ne!(cursor, SWEEP_BUSY);
            assert_eq!(sweep_position(cursor), (segment, pair));
        }
    }

    #[test]
    fn test_sweep_walks_table_in_steps() {
        let table = table(2);
        for key in 0..200 {
            table.put(key, key);
        }
        let budget = table.capacity() / 8;
        let mut calls = 0;
        let mut removed = 0;
        loop {
            let step = table.sweep(budget, |_, v| v % 2 == 0).expect("sole sweeper");
            calls += 1;
            removed += step.removed;
            if !step.pending {
                break;
            }
            assert!(table.sweep_pending());
        }
        assert!(calls >= 8);
        assert!(!table.sweep_pending());

        // entries moved back behind the cursor are picked up by later sweeps
        for _ in 0..8 {
            let step = table.sweep(usize::MAX, |_, v| v % 2 == 0).expect("sole sweeper");
            assert!(!step.pending);
            removed += step.removed;
        }
        assert_eq!(removed, 100);
        assert_eq!(table.len(), 100);
        assert!((0..200).all(|key| table.contains_key(&key) == (key % 2 == 1)));
    }

    #[test]
    fn test_sweep_is_exclusive() {
        let table = table(2);
        table.put(1, 1);
        table.sweep.store(SWEEP_BUSY, Ordering::Release);
        assert!(table.sweep_pending());
        assert_eq!(table.sweep(usize::MAX, |_, _| true), None);
        assert_eq!(table.len(), 1);

        table.sweep.store(SWEEP_IDLE, Ordering::Release);
        let step = table.sweep(usize::MAX, |_, _| true).expect("cursor released");
        assert_eq!(step, Sweep { removed: 1, pending: false });
        assert!(table.is_empty());
        assert!(!table.sweep_pending());
    }

    #[test]
    fn test_sweep_releases_cursor_on_panic() {
        let table = table(2);
        table.put(1, 1);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            table.sweep(usize::MAX, |_, _| panic!("predicate failed"))
        }));
        assert!(outcome.is_err());
        assert!(!table.sweep_pending());
        assert!(table.sweep(usize::MAX, |_, _| false).is_some());
    }

    #[test]
    fn test_metrics_report() {
        let table = table(2);
        table.put(1, 1);
        let metrics = table.metrics();
        assert_eq!(metrics.get("entries"), Some(&1.0));
        assert_eq!(metrics.get("segments"), Some(&2.0));
        assert_eq!(table.algorithm_name(), "ClosedTable");
    }
}
