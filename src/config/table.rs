//! Configuration for the concurrent open-addressing table.

use crate::segment::{MAX_SEGMENT_LENGTH, MIN_SEGMENT_LENGTH};
use core::fmt;

/// Default number of segments: four per CPU (rounded up to a power of two,
/// at least two CPUs assumed).
fn default_segment_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|p: std::num::NonZeroUsize| p.get())
        .unwrap_or(4);
    4 * cpus.max(2).next_power_of_two()
}

/// Configuration for a [`Table`](crate::Table).
///
/// # Optional Parameters (Builder Methods)
///
/// - `segments`: Number of independent segments (default: `4 * next_pow2(max(2, cpus))`)
/// - `segment_length`: Initial positions per segment, two per entry (default: 32)
/// - `load_factor`: Fraction of pairs a segment fills before it doubles (default: 0.67)
/// - `hash_seed`: Seed mixed into every hash (default: random per table)
///
/// # Examples
///
/// ```
/// use closed_table::config::TableConfig;
/// use closed_table::Table;
///
/// let config = TableConfig::new()
///     .with_segments(2)
///     .with_segment_length(64)
///     .with_hash_seed(7);
/// let table: Table<u64, String> = Table::init(config, None);
/// assert_eq!(table.segment_count(), 2);
/// assert_eq!(table.capacity(), 64);
/// ```
#[derive(Clone, Copy)]
pub struct TableConfig {
    segments: usize,
    segment_length: usize,
    load_factor: f32,
    hash_seed: Option<u32>,
}

impl TableConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: default_segment_count(),
            segment_length: MIN_SEGMENT_LENGTH,
            load_factor: 0.67,
            hash_seed: None,
        }
    }

    /// Sets the number of segments.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is 0 or not a power of two.
    #[must_use]
    pub fn with_segments(mut self, segments: usize) -> Self {
        assert!(segments > 0, "segments must be > 0");
        assert!(segments.is_power_of_two(), "segments must be a power of two");
        assert!(segments <= 1 << 16, "segments must be <= 65536");
        self.segments = segments;
        self
    }

    /// Sets the initial length of every segment, in key/value positions.
    ///
    /// # Panics
    ///
    /// Panics if `length` is not a power of two in `32..=2^29`.
    #[must_use]
    pub fn with_segment_length(mut self, length: usize) -> Self {
        assert!(length.is_power_of_two(), "segment length must be a power of two");
        assert!(
            (MIN_SEGMENT_LENGTH..=MAX_SEGMENT_LENGTH).contains(&length),
            "segment length must be in 32..=2^29"
        );
        self.segment_length = length;
        self
    }

    /// Sets the load factor that triggers a segment resize.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not in `(0, 1]`.
    #[must_use]
    pub fn with_load_factor(mut self, load_factor: f32) -> Self {
        assert!(
            load_factor > 0.0 && load_factor <= 1.0,
            "load factor must be in (0, 1]"
        );
        self.load_factor = load_factor;
        self
    }

    /// Fixes the hash seed, making segment and slot placement reproducible.
    #[must_use]
    pub fn with_hash_seed(mut self, seed: u32) -> Self {
        self.hash_seed = Some(seed);
        self
    }

    /// Returns the number of segments.
    #[inline]
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Returns the initial segment length in positions.
    #[inline]
    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    /// Returns the load factor.
    #[inline]
    pub fn load_factor(&self) -> f32 {
        self.load_factor
    }

    /// Returns the fixed hash seed, if any.
    #[inline]
    pub fn hash_seed(&self) -> Option<u32> {
        self.hash_seed
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("segments", &self.segments)
            .field("segment_length", &self.segment_length)
            .field("load_factor", &self.load_factor)
            .field("hash_seed", &self.hash_seed)
            .finish()
    }
}
