//! Metrics System
//!
//! Tables and caches expose their counters through the [`CacheMetrics`] trait
//! as a `BTreeMap<String, f64>`.
//!
//! BTreeMap is used instead of HashMap so that metrics always appear in the
//! same order, which keeps reports and test output reproducible.

use std::collections::BTreeMap;

pub mod record_cache;
pub mod table;

pub use record_cache::RecordCacheMetrics;
pub use table::TableMetrics;

/// Uniform metrics reporting.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name identifying the structure reporting the metrics.
    fn algorithm_name(&self) -> &'static str;
}
