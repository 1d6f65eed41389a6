//! Size-Class Array Pool
//!
//! Records are stored as flat slot arrays whose lengths are multiples of
//! four. Arrays freed by evicted records are wiped and kept in a per-class
//! pool so the next record of a similar shape reuses them instead of hitting
//! the global allocator.
//!
//! ```text
//! class:   4      8      12     ...    252
//! pool:  [ ... ][ ... ][ ... ]  ...  [ ... ]   each holds <= max_pooled arrays
//! ```
//!
//! Requests longer than 252 slots (and empty requests) bypass the pool.
//!
//! # Example
//!
//! ```
//! use closed_table::{Allocator, Slot};
//!
//! let allocator: Allocator<String> = Allocator::new(2);
//! let array = allocator.get(10);
//! assert_eq!(array.len(), 12);
//! assert!(array.iter().all(Slot::is_absent));
//! assert!(allocator.offer(array));
//! assert_eq!(allocator.pooled(), 1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::record::Slot;

const SHIFT: u32 = 2;
const ROUND: usize = (1 << SHIFT) - 1;

/// Largest pooled array length.
pub const MAX_POOLED_LENGTH: usize = 252;

/// Pool capacity used when `0` is requested.
pub const DEFAULT_MAX_POOLED: usize = 512;

/// Rounds `length` up to its size class, the next multiple of 4.
///
/// ```
/// use closed_table::allocator::size_class;
///
/// assert_eq!(size_class(0), 0);
/// assert_eq!(size_class(1), 4);
/// assert_eq!(size_class(12), 12);
/// assert_eq!(size_class(13), 16);
/// ```
#[inline]
pub const fn size_class(length: usize) -> usize {
    (length + ROUND) & !ROUND
}

struct Pool<T> {
    arrays: Mutex<Vec<Box<[Slot<T>]>>>,
    /// Mirror of `arrays.len()`, read without the lock.
    len: AtomicUsize,
}

impl<T> Pool<T> {
    fn new() -> Self {
        Self {
            arrays: Mutex::new(Vec::new()),
            len: AtomicUsize::new(0),
        }
    }
}

/// A pool of recycled slot arrays, one pool per size class in `4..=252`.
pub struct Allocator<T> {
    pools: Box<[Pool<T>]>,
    max_pooled: usize,
}

impl<T> Allocator<T> {
    /// Creates an allocator keeping at most `max_pooled` arrays per size
    /// class. `0` selects the default of 512.
    pub fn new(max_pooled: usize) -> Self {
        let max_pooled = if max_pooled > 0 {
            max_pooled
        } else {
            DEFAULT_MAX_POOLED
        };
        Self {
            pools: (0..MAX_POOLED_LENGTH >> SHIFT).map(|_| Pool::new()).collect(),
            max_pooled,
        }
    }

    /// The pool for arrays of exactly `class` slots, if such arrays are pooled.
    fn pool(&self, class: usize) -> Option<&Pool<T>> {
        match class >> SHIFT {
            0 => None,
            idx => self.pools.get(idx - 1),
        }
    }

    /// Returns an array of `size_class(length)` slots, all [`Slot::Absent`].
    ///
    /// A pooled array of that class is reused if one is available.
    pub fn get(&self, length: usize) -> Box<[Slot<T>]> {
        let class = size_class(length);
        if let Some(pool) = self.pool(class) {
            let mut arrays = pool.arrays.lock();
            if let Some(array) = arrays.pop() {
                pool.len.store(arrays.len(), Ordering::Relaxed);
                return array;
            }
        }
        (0..class).map(|_| Slot::Absent).collect()
    }

    /// Offers `array` back to its pool.
    ///
    /// Only arrays whose length is exactly a pooled size class are taken.
    /// Returns `false` if the array was rejected (wrong length or a full
    /// pool). Accepted arrays are wiped to [`Slot::Absent`] first,
    /// which drops any values they still held.
    pub fn offer(&self, mut array: Box<[Slot<T>]>) -> bool {
        let length = array.len();
        if length != size_class(length) {
            return false;
        }
        let Some(pool) = self.pool(length) else {
            return false;
        };
        // Unsynchronized peek: may be stale, saves the wipe and the lock when
        // the pool is full.
        if pool.len.load(Ordering::Relaxed) >= self.max_pooled {
            return false;
        }
        for slot in array.iter_mut() {
            *slot = Slot::Absent;
        }
        let mut arrays = pool.arrays.lock();
        if arrays.len() >= self.max_pooled {
            // the peek was stale
            return false;
        }
        arrays.push(array);
        pool.len.store(arrays.len(), Ordering::Relaxed);
        true
    }

    /// Total number of pooled arrays across all size classes.
    pub fn pooled(&self) -> usize {
        self.pools.iter().map(|pool| pool.arrays.lock().len()).sum()
    }

    /// Maximum number of arrays kept per size class.
    pub fn max_pooled(&self) -> usize {
        self.max_pooled
    }
}

impl<T> Default for Allocator<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}

impl<T> fmt::Debug for Allocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("max_pooled", &self.max_pooled)
            .field("pooled", &self.pooled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_rounding() {
        assert_eq!(size_class(0), 0);
        for n in 1..=4 {
            assert_eq!(size_class(n), 4);
        }
        assert_eq!(size_class(5), 8);
        assert_eq!(size_class(252), 252);
        assert_eq!(size_class(253), 256);
    }

    #[test]
    fn test_get_zero_is_empty() {
        let allocator: Allocator<u8> = Allocator::new(4);
        assert!(allocator.get(0).is_empty());
        assert!(!allocator.offer(allocator.get(0)));
    }

    #[test]
    fn test_large_arrays_bypass_pool() {
        let allocator: Allocator<u8> = Allocator::new(4);
        let array = allocator.get(300);
        assert_eq!(array.len(), 300);
        assert!(!allocator.offer(array));
        assert_eq!(allocator.pooled(), 0);
    }

    #[test]
    fn test_offer_rejects_unclassed_lengths() {
        let allocator: Allocator<u8> = Allocator::new(4);
        let odd: Box<[Slot<u8>]> = (0..7).map(|_| Slot::Absent).collect();
        assert!(!allocator.offer(odd));
    }

    #[test]
    fn test_offered_array_is_wiped_and_reused() {
        let allocator: Allocator<String> = Allocator::new(4);
        let mut array = allocator.get(6);
        assert_eq!(array.len(), 8);
        array[0] = Slot::Value("x".to_string());
        array[1] = Slot::Null;
        let ptr = array.as_ptr();
        assert!(allocator.offer(array));

        let reused = allocator.get(5);
        assert_eq!(reused.as_ptr(), ptr);
        assert!(reused.iter().all(Slot::is_absent));
        assert_eq!(allocator.pooled(), 0);
    }

    #[test]
    fn test_full_pool_rejects_despite_stale_peek() {
        let allocator: Allocator<u8> = Allocator::new(1);
        assert!(allocator.offer(allocator.get(4)));
        let pool = allocator.pool(4).expect("pooled class");
        // mirror lags behind the pool, as a racing offer may see it
        pool.len.store(0, Ordering::Relaxed);

        let array: Box<[Slot<u8>]> = (0..4).map(|_| Slot::Absent).collect();
        assert!(!allocator.offer(array));
        assert_eq!(allocator.pooled(), 1);
    }

    #[test]
    fn test_default_capacity() {
        let allocator: Allocator<u8> = Allocator::new(0);
        assert_eq!(allocator.max_pooled(), DEFAULT_MAX_POOLED);
    }
}
