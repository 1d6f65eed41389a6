//! Segment: one independently resizable shard of a [`Table`](crate::Table).
//!
//! A segment is a power-of-two array of key/value positions. Even positions
//! hold keys, the following odd position holds that key's value; both are
//! stored together in one [`Slot`] so position `i` lives in `slots[i >> 1]`.
//! Probing starts at `hash & (len - 2)` and steps by 2, wrapping to 0.
//!
//! ```text
//! positions  0   1   2   3  ...  14  15 | 16  17  ...  30  31 | ...
//!            k   v   k   v  ...   k   v |  k   v  ...   k   v |
//!            ------- lock group 0 ------ | --- lock group 1 --- |
//!
//! words:     [ g0 | g1 | ... | gN-1 | size | tombstones ]
//! ```
//!
//! # Lock words
//!
//! Every group of 8 key/value pairs shares one `AtomicU32`. An odd word means
//! the group is locked; every lock/unlock cycle raises the word by exactly 2,
//! so a reader that sees the same even word before and after loading a slot
//! knows the slot was not modified in between. Two extra cells after the
//! group words hold the entry count and the tombstone count.
//!
//! Writers lock groups as their probe enters them and hold them until the
//! operation ends. A writer that fails to take a lock releases everything it
//! holds and starts over, so no writer ever waits while holding a lock (close
//! deletion waits briefly, then gives up and leaves a tombstone).
//!
//! # Replacement
//!
//! The `replacement` pointer is only ever compared, never dereferenced:
//!
//! | value | meaning |
//! |-------|---------|
//! | null | idle |
//! | this segment | an expunge pass runs |
//! | another segment | resized; the other segment is the successor |
//!
//! Resizing freezes the segment: the resizer takes every lock word and never
//! releases them. Keys and values are then moved to the successor by pointer,
//! which takes ownership of them, and the frozen segment is retired through
//! the epoch collector.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use crate::backoff::Backoff;
use crate::metrics::TableMetrics;
use crate::slot_set::SlotSet;

/// Smallest segment length (in positions).
pub(crate) const MIN_SEGMENT_LENGTH: usize = 32;

/// Largest segment length (in positions); such a segment never resizes.
pub(crate) const MAX_SEGMENT_LENGTH: usize = 1 << 29;

/// `position >> GROUP_SHIFT` is the position's lock group (8 pairs).
const GROUP_SHIFT: u32 = 4;

/// Tag carried by a null key pointer to mark a tombstone.
const TOMBSTONE_TAG: usize = 1;

/// Backoff attempts close deletion makes on a busy lock before it leaves a
/// tombstone instead.
const DELETION_PATIENCE: u32 = 64;

/// A key together with its mixed hash, so probes and resizes never rehash.
pub(crate) struct KeyNode<K> {
    pub(crate) hash: u32,
    pub(crate) key: K,
}

struct Slot<K, V> {
    key: Atomic<KeyNode<K>>,
    value: Atomic<V>,
}

/// Outcome of [`Segment::put`].
pub(crate) enum Put<'g, K, V> {
    /// A new entry was added; `grow` is set once the size passed the threshold.
    Inserted { grow: bool },
    /// The key existed; its previous value is handed back for retirement.
    Replaced(Shared<'g, V>),
    /// Nothing was written; the key and value are handed back.
    Retry(Owned<KeyNode<K>>, Owned<V>, Retry),
}

/// Why a put could not complete in this segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// The segment was replaced by a successor.
    Moved,
    /// The probe exceeded its step bound.
    Crowded,
    /// The probe went full circle without finding room.
    Full,
}

/// Outcome of [`Segment::remove`].
pub(crate) enum Remove<'g, K, V> {
    Removed(Shared<'g, KeyNode<K>>, Shared<'g, V>),
    Absent,
    Moved,
}

/// Outcome of [`Segment::get`].
pub(crate) enum Lookup<'g, V> {
    Found(&'g V),
    Missing,
    Moved,
    /// The probe crossed too many tombstones; an expunge is due.
    Tombstones,
    /// The probe went full circle; the key is absent and a resize is due.
    Full,
}

#[inline]
pub(crate) fn index_of(hash: u32, len: usize) -> usize {
    hash as usize & (len - 2)
}

#[inline]
fn next_index(i: usize, len: usize) -> usize {
    if i + 2 < len {
        i + 2
    } else {
        0
    }
}

#[inline]
fn group_of(i: usize) -> usize {
    i >> GROUP_SHIFT
}

#[inline]
fn is_locked(word: u32) -> bool {
    word & 1 == 1
}

#[inline]
fn tombstone<'g, T>() -> Shared<'g, T> {
    Shared::null().with_tag(TOMBSTONE_TAG)
}

#[inline]
fn is_tombstone<T>(p: Shared<'_, T>) -> bool {
    p.is_null() && p.tag() == TOMBSTONE_TAG
}

/// Whether the entry at `i` with natural position `natural` may move back
/// into the gap at `gap` (Knuth, vol. 3, 6.4, algorithm R).
#[inline]
fn crosses(gap: usize, i: usize, natural: usize) -> bool {
    (i < natural && (natural <= gap || gap <= i)) || (natural <= gap && gap <= i)
}

/// The run of lock groups a writer currently holds.
///
/// Probes and close deletion only ever move forward, so the held groups are
/// always contiguous (modulo wrap-around) starting at `first`.
#[derive(Debug, Default)]
struct LockSpan {
    first: usize,
    count: usize,
}

impl LockSpan {
    fn holds(&self, group: usize, groups: usize) -> bool {
        self.count == groups
            || (self.count > 0 && (group + groups - self.first) % groups < self.count)
    }

    /// Makes sure `group` is held, taking its lock if needed.
    fn lock<K, V>(&mut self, segment: &Segment<K, V>, group: usize) -> bool {
        let groups = segment.groups();
        if self.holds(group, groups) {
            return true;
        }
        debug_assert!(self.count == 0 || (self.first + self.count) % groups == group);
        if !segment.try_lock_group(group) {
            return false;
        }
        if self.count == 0 {
            self.first = group;
        }
        self.count += 1;
        true
    }

    fn release<K, V>(&mut self, segment: &Segment<K, V>) {
        let groups = segment.groups();
        for n in 0..self.count {
            segment.unlock_group((self.first + n) % groups);
        }
        self.count = 0;
    }
}

pub(crate) struct Segment<K, V> {
    slots: Box<[Slot<K, V>]>,
    /// One word per lock group, then the size and tombstone counters.
    words: Box<[AtomicU32]>,
    len: usize,
    threshold: usize,
    replacement: Atomic<Segment<K, V>>,
    gate: Arc<Mutex<()>>,
}

impl<K, V> Segment<K, V> {
    /// Creates an empty segment of `len` positions sharing `gate`.
    pub(crate) fn new(len: usize, load_factor: f32, gate: Arc<Mutex<()>>) -> Self {
        debug_assert!(len.is_power_of_two() && len >= MIN_SEGMENT_LENGTH);
        let slots = (0..len >> 1)
            .map(|_| Slot {
                key: Atomic::null(),
                value: Atomic::null(),
            })
            .collect();
        let groups = (len >> GROUP_SHIFT).max(1);
        let words = (0..groups + 2).map(|_| AtomicU32::new(0)).collect();
        Self {
            slots,
            words,
            len,
            threshold: ((len >> 1) as f32 * load_factor).round() as usize,
            replacement: Atomic::null(),
            gate,
        }
    }

    /// Length in positions (twice the number of pairs).
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn groups(&self) -> usize {
        self.words.len() - 2
    }

    #[inline]
    pub(crate) fn gate(&self) -> &Arc<Mutex<()>> {
        &self.gate
    }

    pub(crate) fn size(&self) -> usize {
        (self.words[self.groups()].load(Ordering::Acquire) as i32).max(0) as usize
    }

    fn add_size(&self, delta: i32) -> i32 {
        let cell = &self.words[self.groups()];
        let prev = cell.fetch_add(delta as u32, Ordering::AcqRel);
        prev.wrapping_add(delta as u32) as i32
    }

    pub(crate) fn tombstones(&self) -> usize {
        (self.words[self.groups() + 1].load(Ordering::Acquire) as i32).max(0) as usize
    }

    fn add_tombstones(&self, delta: i32) {
        self.words[self.groups() + 1].fetch_add(delta as u32, Ordering::AcqRel);
    }

    /// Whether tombstones exceed an eighth of the pair capacity.
    pub(crate) fn needs_expunge(&self) -> bool {
        self.tombstones() > self.len >> 4
    }

    fn as_shared<'g>(&self) -> Shared<'g, Self> {
        Shared::from(self as *const Self)
    }

    /// Whether a resize has published (or finished installing) a successor.
    pub(crate) fn is_replaced(&self, guard: &Guard) -> bool {
        let replacement = self.replacement.load(Ordering::SeqCst, guard);
        !replacement.is_null() && replacement.as_raw() != self as *const Self
    }

    pub(crate) fn try_lock_group(&self, group: usize) -> bool {
        let word = &self.words[group];
        let current = word.load(Ordering::Relaxed);
        !is_locked(current)
            && word
                .compare_exchange(
                    current,
                    current.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    pub(crate) fn unlock_group(&self, group: usize) {
        let word = &self.words[group];
        let current = word.load(Ordering::Relaxed);
        let released = is_locked(current)
            && word
                .compare_exchange(
                    current,
                    current.wrapping_add(1),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok();
        if !released {
            panic!("lock group {group} released while not held (word {current:#x})");
        }
    }

    /// Sum of the lock words of `count` consecutive groups from `first`.
    fn versions(&self, first: usize, count: usize) -> u32 {
        let groups = self.groups();
        (0..count).fold(0u32, |sum, n| {
            sum.wrapping_add(self.words[(first + n) % groups].load(Ordering::Acquire))
        })
    }

    /// Inserts `node -> value`, or replaces the value if the key is present.
    pub(crate) fn put<'g>(
        &self,
        node: Owned<KeyNode<K>>,
        value: Owned<V>,
        guard: &'g Guard,
        metrics: &TableMetrics,
    ) -> Put<'g, K, V>
    where
        K: Eq,
    {
        let len = self.len;
        let start = index_of(node.hash, len);
        let bound = if len < MAX_SEGMENT_LENGTH {
            (len >> 4).max(8)
        } else {
            usize::MAX
        };
        let mut backoff = Backoff::new();

        'restart: loop {
            if self.is_replaced(guard) {
                return Put::Retry(node, value, Retry::Moved);
            }
            let mut span = LockSpan::default();
            let mut free = None;
            let mut i = start;
            let mut steps = 0;

            let claim = loop {
                if !span.lock(self, group_of(i)) {
                    span.release(self);
                    metrics.record_contention();
                    backoff.snooze();
                    continue 'restart;
                }
                let slot = &self.slots[i >> 1];
                let current = slot.key.load(Ordering::Acquire, guard);
                if is_tombstone(current) {
                    free.get_or_insert(i);
                } else if current.is_null() {
                    break free.unwrap_or(i);
                } else {
                    // SAFETY: key nodes are only freed through the epoch
                    // collector and `guard` is pinned.
                    let found = unsafe { current.deref() };
                    if found.hash == node.hash && found.key == node.key {
                        let old = slot.value.swap(value, Ordering::AcqRel, guard);
                        span.release(self);
                        return Put::Replaced(old);
                    }
                }

                i = next_index(i, len);
                steps += 1;
                if i == start {
                    match free {
                        Some(at) => break at,
                        None => {
                            span.release(self);
                            return Put::Retry(node, value, Retry::Full);
                        }
                    }
                }
                if steps > bound {
                    span.release(self);
                    return Put::Retry(node, value, Retry::Crowded);
                }
            };

            let target = &self.slots[claim >> 1];
            let expected = target.key.load(Ordering::Relaxed, guard);
            target.value.store(value, Ordering::Release);
            if target
                .key
                .compare_exchange(expected, node, Ordering::Release, Ordering::Relaxed, guard)
                .is_err()
            {
                panic!("key slot {claim} changed while its lock group was held");
            }
            span.release(self);
            if is_tombstone(expected) {
                self.add_tombstones(-1);
            }
            let size = self.add_size(1);
            return Put::Inserted {
                grow: size > self.threshold as i32,
            };
        }
    }

    /// Removes `key`, closing the gap it leaves behind.
    pub(crate) fn remove<'g, Q>(
        &self,
        hash: u32,
        key: &Q,
        guard: &'g Guard,
        metrics: &TableMetrics,
    ) -> Remove<'g, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let len = self.len;
        let start = index_of(hash, len);
        let mut backoff = Backoff::new();

        'restart: loop {
            if self.is_replaced(guard) {
                return Remove::Moved;
            }
            let mut span = LockSpan::default();
            let mut i = start;
            loop {
                if !span.lock(self, group_of(i)) {
                    span.release(self);
                    metrics.record_contention();
                    backoff.snooze();
                    continue 'restart;
                }
                let slot = &self.slots[i >> 1];
                let current = slot.key.load(Ordering::Acquire, guard);
                if current.is_null() {
                    if !is_tombstone(current) {
                        span.release(self);
                        return Remove::Absent;
                    }
                } else {
                    // SAFETY: see `put`.
                    let found = unsafe { current.deref() };
                    if found.hash == hash && found.key.borrow() == key {
                        let value = slot.value.swap(Shared::null(), Ordering::AcqRel, guard);
                        slot.key.store(Shared::null(), Ordering::Release);
                        if !self.close_gap(i, &mut span, DELETION_PATIENCE, guard, metrics) {
                            self.add_tombstones(1);
                            metrics.record_tombstone();
                        }
                        span.release(self);
                        self.add_size(-1);
                        return Remove::Removed(current, value);
                    }
                }
                i = next_index(i, len);
                if i == start {
                    span.release(self);
                    return Remove::Absent;
                }
            }
        }
    }

    /// Close deletion: walks forward from `gap`, moving back every entry whose
    /// probe chain runs through the gap, until an empty slot ends the chain.
    ///
    /// Returns `false` if a lock could not be taken within `patience` attempts
    /// (or the segment is being resized); the current gap is then left as a
    /// tombstone.
    fn close_gap(
        &self,
        mut gap: usize,
        span: &mut LockSpan,
        patience: u32,
        guard: &Guard,
        metrics: &TableMetrics,
    ) -> bool {
        let len = self.len;
        let mut i = next_index(gap, len);
        let mut backoff = Backoff::new();
        loop {
            if i == gap {
                // full circle without an empty slot
                self.slots[gap >> 1].key.store(tombstone(), Ordering::Release);
                return false;
            }
            if !span.lock(self, group_of(i)) {
                if backoff.attempts() < patience && !self.is_replaced(guard) {
                    backoff.snooze();
                    continue;
                }
                self.slots[gap >> 1].key.store(tombstone(), Ordering::Release);
                trace!(gap, "close deletion blocked, leaving a tombstone");
                return false;
            }

            let slot = &self.slots[i >> 1];
            let current = slot.key.load(Ordering::Acquire, guard);
            if current.is_null() {
                if !is_tombstone(current) {
                    self.slots[gap >> 1].key.store(Shared::null(), Ordering::Release);
                    return true;
                }
            } else {
                // SAFETY: see `put`.
                let natural = index_of(unsafe { current.deref() }.hash, len);
                if crosses(gap, i, natural) {
                    let value = slot.value.load(Ordering::Acquire, guard);
                    let hole = &self.slots[gap >> 1];
                    hole.value.store(value, Ordering::Release);
                    hole.key.store(current, Ordering::Release);
                    slot.key.store(Shared::null(), Ordering::Release);
                    slot.value.store(Shared::null(), Ordering::Release);
                    gap = i;
                    metrics.record_relocation();
                }
            }
            i = next_index(i, len);
        }
    }

    /// Tries to close the tombstone at `at` without waiting on any lock.
    fn collapse(&self, at: usize, guard: &Guard, metrics: &TableMetrics) -> bool {
        let mut span = LockSpan::default();
        if !span.lock(self, group_of(at)) {
            return false;
        }
        let closed = is_tombstone(self.slots[at >> 1].key.load(Ordering::Acquire, guard))
            && self.close_gap(at, &mut span, 0, guard, metrics);
        span.release(self);
        closed
    }

    /// Runs close deletion from every tombstone. Returns how many were removed.
    ///
    /// Does nothing if another transition holds the gate.
    pub(crate) fn expunge(&self, guard: &Guard, metrics: &TableMetrics) -> usize {
        let Some(_gate) = self.gate.try_lock() else {
            return 0;
        };
        let this = self.as_shared();
        if self
            .replacement
            .compare_exchange(Shared::null(), this, Ordering::SeqCst, Ordering::SeqCst, guard)
            .is_err()
        {
            return 0;
        }

        let before = self.tombstones();
        let mut collapsed = 0;
        for at in (0..self.len).step_by(2) {
            if is_tombstone(self.slots[at >> 1].key.load(Ordering::Acquire, guard))
                && self.collapse(at, guard, metrics)
            {
                collapsed += 1;
            }
        }
        if collapsed > 0 {
            self.add_tombstones(-(collapsed as i32));
        }

        if self
            .replacement
            .compare_exchange(this, Shared::null(), Ordering::SeqCst, Ordering::SeqCst, guard)
            .is_err()
        {
            panic!("segment replacement changed during an expunge pass");
        }
        metrics.record_expunge(collapsed);
        debug!(len = self.len, before, collapsed, "expunged tombstones");
        collapsed
    }

    /// Replaces this segment in `slot` with one of twice the length.
    ///
    /// At the maximum length an expunge pass runs instead. Returns `false` if
    /// nothing changed, e.g. because another thread holds the gate or the
    /// segment is no longer installed in `slot`.
    pub(crate) fn resize(
        &self,
        slot: &Atomic<Segment<K, V>>,
        load_factor: f32,
        guard: &Guard,
        metrics: &TableMetrics,
    ) -> bool {
        let len = self.len << 1;
        if len > MAX_SEGMENT_LENGTH {
            return self.expunge(guard, metrics) > 0;
        }
        let Some(_gate) = self.gate.try_lock() else {
            return false;
        };
        let this = self.as_shared();
        if slot.load(Ordering::Acquire, guard) != this {
            return false;
        }

        let successor = Owned::new(Segment::new(len, load_factor, Arc::clone(&self.gate)))
            .into_shared(guard);
        if self
            .replacement
            .compare_exchange(Shared::null(), successor, Ordering::SeqCst, Ordering::SeqCst, guard)
            .is_err()
        {
            // SAFETY: never published.
            drop(unsafe { successor.into_owned() });
            return false;
        }

        // Freeze: take every group and keep it.
        let mut backoff = Backoff::new();
        for group in 0..self.groups() {
            while !self.try_lock_group(group) {
                backoff.snooze();
            }
        }

        // SAFETY: `successor` is alive; it is owned by this function until it
        // is installed below.
        let next = unsafe { successor.deref() };
        let mut moved = 0i32;
        for old in self.slots.iter() {
            let key = old.key.load(Ordering::Acquire, guard);
            if key.is_null() {
                continue;
            }
            let value = old.value.load(Ordering::Acquire, guard);
            // SAFETY: see `put`.
            let mut i = index_of(unsafe { key.deref() }.hash, len);
            while !next.slots[i >> 1].key.load(Ordering::Relaxed, guard).is_null() {
                i = next_index(i, len);
            }
            next.slots[i >> 1].value.store(value, Ordering::Relaxed);
            next.slots[i >> 1].key.store(key, Ordering::Relaxed);
            moved += 1;
        }
        next.add_size(moved);

        slot.store(successor, Ordering::Release);
        self.replacement.store(successor, Ordering::SeqCst);
        // SAFETY: unlinked from the table above; keys and values now belong
        // to the successor, see `Drop`.
        unsafe { guard.defer_destroy(this) };
        metrics.record_resize();
        debug!(from = self.len, to = len, entries = moved, "resized segment");
        true
    }

    /// Draws up to `sample_size - out.len()` random live entries into `out`.
    ///
    /// Locked, empty, tombstoned, already drawn and torn slots each cost one
    /// retry out of a budget of `max(1, sample_size / 4)`.
    pub(crate) fn sample<'g, R>(
        &self,
        rng: &mut R,
        sample_size: usize,
        out: &mut Vec<(&'g K, &'g V)>,
        guard: &'g Guard,
    ) where
        R: Rng + ?Sized,
    {
        let pairs = self.len >> 1;
        let mut seen = SlotSet::with_capacity(sample_size);
        let mut retries = (sample_size >> 2).max(1);
        while out.len() < sample_size && retries > 0 {
            let pair = rng.gen_range(0..pairs);
            if seen.contains(pair) {
                retries -= 1;
                continue;
            }
            match self.read_pair(pair, guard) {
                Some(entry) => {
                    out.push(entry);
                    seen.insert(pair);
                }
                None => retries -= 1,
            }
        }
    }

    /// Reads the live entry of `pair` without locking.
    ///
    /// Returns `None` for empty and tombstoned pairs, and for pairs that are
    /// locked or change while being read.
    pub(crate) fn read_pair<'g>(&self, pair: usize, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
        let word = &self.words[group_of(pair << 1)];
        let version = word.load(Ordering::Acquire);
        if is_locked(version) {
            return None;
        }
        let slot = &self.slots[pair];
        let key = slot.key.load(Ordering::Acquire, guard);
        let value = slot.value.load(Ordering::Acquire, guard);
        fence(Ordering::Acquire);
        if key.is_null() || value.is_null() || word.load(Ordering::Relaxed) != version {
            return None;
        }
        // SAFETY: both pointers are non-null and protected by `guard`.
        Some(unsafe { (&key.deref().key, value.deref()) })
    }

    /// Optimistic, lock-free lookup.
    ///
    /// With `expunge` set, crossing `len / 8` tombstones stops the probe with
    /// [`Lookup::Tombstones`].
    pub(crate) fn get<'g, Q>(&self, hash: u32, key: &Q, expunge: bool, guard: &'g Guard) -> Lookup<'g, V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let len = self.len;
        let start = index_of(hash, len);
        let first = group_of(start);
        let tombstone_limit = if expunge {
            (len >> 3).max(1)
        } else {
            usize::MAX
        };
        let mut backoff = Backoff::new();

        'restart: loop {
            let mut i = start;
            let mut group = usize::MAX;
            let mut version = 0u32;
            let mut visited = 0usize;
            let mut sum = 0u32;
            let mut tombstones = 0usize;

            loop {
                let g = group_of(i);
                if g != group {
                    let word = self.words[g].load(Ordering::Acquire);
                    if is_locked(word) {
                        if self.is_replaced(guard) {
                            return Lookup::Moved;
                        }
                        backoff.snooze();
                        continue 'restart;
                    }
                    group = g;
                    version = word;
                    sum = sum.wrapping_add(word);
                    visited += 1;
                }

                let slot = &self.slots[i >> 1];
                let k = slot.key.load(Ordering::Acquire, guard);
                let v = slot.value.load(Ordering::Acquire, guard);
                fence(Ordering::Acquire);
                if self.words[g].load(Ordering::Relaxed) != version {
                    backoff.snooze();
                    continue 'restart;
                }

                if is_tombstone(k) {
                    tombstones += 1;
                    if tombstones >= tombstone_limit {
                        return Lookup::Tombstones;
                    }
                } else if k.is_null() {
                    // An entry may have moved back into a group already passed.
                    if self.versions(first, visited) != sum {
                        backoff.snooze();
                        continue 'restart;
                    }
                    return Lookup::Missing;
                } else {
                    // SAFETY: see `put`.
                    let node = unsafe { k.deref() };
                    if node.hash == hash && node.key.borrow() == key {
                        // SAFETY: validated together with the key above.
                        match unsafe { v.as_ref() } {
                            Some(value) => return Lookup::Found(value),
                            None => {
                                backoff.snooze();
                                continue 'restart;
                            }
                        }
                    }
                }

                i = next_index(i, len);
                if i == start {
                    if self.versions(first, visited) != sum {
                        backoff.snooze();
                        continue 'restart;
                    }
                    return Lookup::Full;
                }
            }
        }
    }
}

impl<K, V> Drop for Segment<K, V> {
    fn drop(&mut self) {
        // SAFETY: a segment is dropped either directly by its owner or by the
        // epoch collector once no thread can observe it.
        let guard = unsafe { epoch::unprotected() };
        let replacement = self.replacement.load(Ordering::Relaxed, guard);
        if !replacement.is_null() && replacement.as_raw() != self as *const Self {
            // entries were moved to the successor
            return;
        }
        for slot in self.slots.iter() {
            let key = slot.key.load(Ordering::Relaxed, guard);
            if !key.is_null() {
                // SAFETY: owned exclusively by this segment.
                drop(unsafe { key.into_owned() });
            }
            let value = slot.value.load(Ordering::Relaxed, guard);
            if !value.is_null() {
                // SAFETY: as above.
                drop(unsafe { value.into_owned() });
            }
        }
    }
}

impl<K, V> fmt::Debug for Segment<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len)
            .field("size", &self.size())
            .field("tombstones", &self.tombstones())
            .field("threshold", &self.threshold)
            .finish()
    }
}
