//! Fixed-capacity set of slot positions.
//!
//! Used by the eviction sampler to remember which key positions of a segment
//! it has already drawn. The set never grows: it is sized once for the maximum
//! number of elements the caller will insert, at a load factor of at most
//! one quarter, so linear probing stays short and always finds an empty cell.

/// Open-addressing set of `usize` values with no rehashing.
///
/// Values are stored shifted by one so that `0` can mark an empty cell;
/// `usize::MAX` therefore cannot be stored.
#[derive(Debug, Clone)]
pub(crate) struct SlotSet {
    table: Vec<usize>,
    len: usize,
}

impl SlotSet {
    /// Creates a set able to hold `max_elements` values.
    pub(crate) fn with_capacity(max_elements: usize) -> Self {
        let cells = max_elements.max(4).next_power_of_two() * 4;
        Self {
            table: vec![0; cells],
            len: 0,
        }
    }

    /// Number of values in the set.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn mask(&self) -> usize {
        self.table.len() - 1
    }

    /// Adds `n`, returning `false` if it was already present.
    ///
    /// # Panics
    ///
    /// Panics if `n == usize::MAX` or the set already holds as many values as
    /// it has cells.
    pub(crate) fn insert(&mut self, n: usize) -> bool {
        assert!(n != usize::MAX, "usize::MAX cannot be stored");
        assert!(self.len < self.table.len(), "slot set overflow");
        let stored = n + 1;
        let mask = self.mask();
        let mut idx = stored & mask;
        loop {
            match self.table[idx] {
                v if v == stored => return false,
                0 => {
                    self.table[idx] = stored;
                    self.len += 1;
                    return true;
                }
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    /// Returns `true` if `n` is in the set.
    pub(crate) fn contains(&self, n: usize) -> bool {
        if n == usize::MAX {
            return false;
        }
        let stored = n + 1;
        let mask = self.mask();
        let mut idx = stored & mask;
        loop {
            match self.table[idx] {
                v if v == stored => return true,
                0 => return false,
                _ => idx = (idx + 1) & mask,
            }
        }
    }
}
