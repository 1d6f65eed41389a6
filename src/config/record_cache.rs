//! Configuration for the record cache.

use super::TableConfig;
use crate::allocator::DEFAULT_MAX_POOLED;
use core::fmt;

/// Configuration for a [`RecordCache`](crate::RecordCache).
///
/// # Required Parameters
///
/// - `max_elements`: Number of records the cache aims to keep; once exceeded,
///   puts start evicting the least valuable records
///
/// # Optional Parameters (Builder Methods)
///
/// - `expiration`: Idle ticks (about one second each) after which a record
///   expires; records also expire `4 * expiration` ticks after being stored
///   (default: 45)
/// - `max_pooled`: Recycled arrays kept per size class (default: 512)
/// - `table`: Configuration of the underlying [`Table`](crate::Table)
///
/// # Examples
///
/// ```
/// use closed_table::config::{RecordCacheConfig, TableConfig};
///
/// let config = RecordCacheConfig::new(10_000)
///     .with_expiration(120)
///     .with_table(TableConfig::new().with_segments(8));
/// assert_eq!(config.max_elements(), 10_000);
/// assert_eq!(config.expiration(), 120);
/// ```
#[derive(Clone, Copy)]
pub struct RecordCacheConfig {
    max_elements: usize,
    expiration: u32,
    max_pooled: usize,
    table: TableConfig,
}

impl RecordCacheConfig {
    /// Creates a configuration for a cache of `max_elements` records.
    ///
    /// # Panics
    ///
    /// Panics if `max_elements` is 0.
    #[must_use]
    pub fn new(max_elements: usize) -> Self {
        assert!(max_elements > 0, "max_elements must be > 0");
        Self {
            max_elements,
            expiration: 45,
            max_pooled: DEFAULT_MAX_POOLED,
            table: TableConfig::new(),
        }
    }

    /// Sets the idle expiration in clock ticks.
    ///
    /// # Panics
    ///
    /// Panics if `expiration` is 0.
    #[must_use]
    pub fn with_expiration(mut self, expiration: u32) -> Self {
        assert!(expiration > 0, "expiration must be > 0");
        self.expiration = expiration;
        self
    }

    /// Sets how many recycled arrays the allocator keeps per size class.
    #[must_use]
    pub fn with_max_pooled(mut self, max_pooled: usize) -> Self {
        self.max_pooled = max_pooled;
        self
    }

    /// Sets the configuration of the underlying table.
    #[must_use]
    pub fn with_table(mut self, table: TableConfig) -> Self {
        self.table = table;
        self
    }

    /// Number of records the cache aims to keep.
    #[inline]
    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Idle ticks after which a record expires.
    #[inline]
    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    /// Recycled arrays kept per size class.
    #[inline]
    pub fn max_pooled(&self) -> usize {
        self.max_pooled
    }

    /// Configuration of the underlying table.
    #[inline]
    pub fn table(&self) -> TableConfig {
        self.table
    }
}

impl fmt::Debug for RecordCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCacheConfig")
            .field("max_elements", &self.max_elements)
            .field("expiration", &self.expiration)
            .field("max_pooled", &self.max_pooled)
            .field("table", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cache_config_defaults() {
        let config = RecordCacheConfig::new(100);
        assert_eq!(config.max_elements(), 100);
        assert_eq!(config.expiration(), 45);
        assert_eq!(config.max_pooled(), 512);
    }

    #[test]
    #[should_panic(expected = "max_elements must be > 0")]
    fn test_record_cache_config_rejects_zero() {
        let _ = RecordCacheConfig::new(0);
    }
}
