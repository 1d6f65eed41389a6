//! Configuration Module
//!
//! Configuration structures for the table and the record cache. Each is a
//! small `Copy` value built with `#[must_use]` builder methods that validate
//! their arguments.
//!
//! | Config | Used by | Description |
//! |--------|---------|-------------|
//! | `TableConfig` | [`Table`](crate::Table) | Segment count and length, load factor, hash seed |
//! | `RecordCacheConfig` | [`RecordCache`](crate::RecordCache) | Target size, expiration, array pool size, table config |
//!
//! # Examples
//!
//! ```
//! use closed_table::config::{RecordCacheConfig, TableConfig};
//! use closed_table::RecordCache;
//!
//! let config = RecordCacheConfig::new(50_000)
//!     .with_expiration(60)
//!     .with_table(TableConfig::new().with_load_factor(0.75));
//! let cache: RecordCache<u64, String> = RecordCache::new(config);
//! assert!(cache.is_empty());
//! ```

pub mod record_cache;
pub mod table;

pub use record_cache::RecordCacheConfig;
pub use table::TableConfig;
