#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ RecordCache      put / get / evict, throttled housekeeping  │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │ Table                        │ Record + Allocator           │
//! │  segments, probing, resize,  │  flat slot arrays, trailer,  │
//! │  tombstones, expirable()     │  size-class recycling        │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │ least_of (one-pass selection), Backoff, crossbeam-epoch     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`table`]: the concurrent open-addressing table
//! - [`select`]: bounded k-smallest selection used by eviction sampling
//! - [`allocator`]: size-class array pool
//! - [`record`]: compact field records
//! - [`cache`]: the record cache
//! - [`clock`]: tick sources for record stamps
//! - [`config`]: configuration structures
//! - [`metrics`]: counters for tables and caches

/// Escalating spin / yield / sleep backoff for contended writers.
mod backoff;

/// Open-addressed set of small integers used by the sampler.
mod slot_set;

/// A single resizable segment of the table.
mod segment;

/// Configuration structures.
pub mod config;

/// Table and cache metrics.
///
/// Tables and caches report through the common [`CacheMetrics`](metrics::CacheMetrics)
/// trait as deterministic, ordered key/value maps.
pub mod metrics;

/// Bounded selection of the k smallest elements of a stream.
pub mod select;

/// Concurrent open-addressing hash table.
pub mod table;

/// Size-class pool for recycled slot arrays.
pub mod allocator;

/// Compact per-object field records.
pub mod record;

/// Tick sources.
pub mod clock;

/// Record cache with sampled eviction and expiration.
pub mod cache;

pub use allocator::{size_class, Allocator};
pub use cache::RecordCache;
pub use record::{ClassId, Record, Slot};
pub use select::least_of;
pub use table::Table;
