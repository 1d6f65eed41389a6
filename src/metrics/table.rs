//! Table Metrics
//!
//! Structural counters for [`Table`](crate::Table): how often segments were
//! resized or expunged, how many tombstones were left behind and collapsed, and
//! how often a writer had to give up its locks and retry.
//!
//! The counters are bumped from many threads at once, so unlike the
//! single-owner metrics of the record cache they are relaxed atomics. A
//! snapshot taken while writers run is approximate.

use super::CacheMetrics;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared structural counters of a [`Table`](crate::Table).
#[derive(Debug, Default)]
pub struct TableMetrics {
    resizes: AtomicU64,
    expunges: AtomicU64,
    tombstones_created: AtomicU64,
    tombstones_collapsed: AtomicU64,
    relocations: AtomicU64,
    contended_retries: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl TableMetrics {
    pub(crate) fn record_resize(&self) {
        bump(&self.resizes, 1);
    }

    pub(crate) fn record_expunge(&self, collapsed: usize) {
        bump(&self.expunges, 1);
        bump(&self.tombstones_collapsed, collapsed as u64);
    }

    pub(crate) fn record_tombstone(&self) {
        bump(&self.tombstones_created, 1);
    }

    pub(crate) fn record_relocation(&self) {
        bump(&self.relocations, 1);
    }

    pub(crate) fn record_contention(&self) {
        bump(&self.contended_retries, 1);
    }

    /// Number of completed segment resizes.
    pub fn resizes(&self) -> u64 {
        self.resizes.load(Ordering::Relaxed)
    }

    /// Number of completed expunge passes.
    pub fn expunges(&self) -> u64 {
        self.expunges.load(Ordering::Relaxed)
    }

    /// Tombstones left behind by removals that could not close their gap.
    pub fn tombstones_created(&self) -> u64 {
        self.tombstones_created.load(Ordering::Relaxed)
    }

    /// Tombstones removed by expunge passes.
    pub fn tombstones_collapsed(&self) -> u64 {
        self.tombstones_collapsed.load(Ordering::Relaxed)
    }

    /// Entries moved backwards by close deletion.
    pub fn relocations(&self) -> u64 {
        self.relocations.load(Ordering::Relaxed)
    }

    /// Times a writer released its locks and restarted because of contention.
    pub fn contended_retries(&self) -> u64 {
        self.contended_retries.load(Ordering::Relaxed)
    }

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("contended_retries".to_string(), self.contended_retries() as f64);
        metrics.insert("expunges".to_string(), self.expunges() as f64);
        metrics.insert("relocations".to_string(), self.relocations() as f64);
        metrics.insert("resizes".to_string(), self.resizes() as f64);
        metrics.insert(
            "tombstones_collapsed".to_string(),
            self.tombstones_collapsed() as f64,
        );
        metrics.insert(
            "tombstones_created".to_string(),
            self.tombstones_created() as f64,
        );
        metrics
    }
}

impl CacheMetrics for TableMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "ClosedTable"
    }
}
