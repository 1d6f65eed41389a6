//! Stress Tests for Concurrent Access
//!
//! These tests verify thread safety and correctness of the table and the
//! record cache under high contention.

use closed_table::config::{RecordCacheConfig, TableConfig};
use closed_table::{ClassId, RecordCache, Table};
use scoped_threadpool::Pool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const NUM_THREADS: usize = 16;
const OPS_PER_THREAD: usize = 10_000;

fn table(segments: usize) -> Table<usize, usize> {
    Table::init(
        TableConfig::new()
            .with_segments(segments)
            .with_segment_length(32),
        None,
    )
}

/// Disjoint key ranges per thread: every insert must survive every resize.
#[test]
fn stress_disjoint_inserts_across_resizes() {
    let table = table(2);
    let mut pool = Pool::new(NUM_THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..NUM_THREADS {
            let table = &table;
            scope.execute(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = t * OPS_PER_THREAD + i;
                    table.put(key, key);
                }
            });
        }
    });

    assert_eq!(table.len(), NUM_THREADS * OPS_PER_THREAD);
    for key in 0..NUM_THREADS * OPS_PER_THREAD {
        assert_eq!(table.get(&key), Some(key), "lost key {key}");
    }
}

/// Many threads hammering the same small key set with mixed operations.
#[test]
fn stress_high_contention_mixed_ops() {
    let table = Arc::new(table(1));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = (i * 7 + t) % 64;
                    match i % 4 {
                        0 | 1 => {
                            table.put(key, key);
                        }
                        2 => {
                            if let Some(v) = table.get(&key) {
                                assert_eq!(v, key);
                            }
                        }
                        _ => {
                            if let Some(v) = table.remove(&key) {
                                assert_eq!(v, key);
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(table.len() <= 64);
    let present = (0..64).filter(|k| table.contains_key(k)).count();
    assert_eq!(present, table.len());
}

/// Readers running against a writer that keeps removing and re-inserting
/// never see a wrong value, and stable keys are never missed.
#[test]
fn stress_readers_never_miss_stable_keys() {
    let table = table(4);
    for key in 0..1_000 {
        table.put(key, key);
    }
    let misses = AtomicUsize::new(0);
    let mut pool = Pool::new(5);
    pool.scoped(|scope| {
        let table = &table;
        scope.execute(move || {
            for round in 0..20 {
                for key in (1_000..3_000).filter(|k| k % 20 == round) {
                    table.put(key, key);
                }
                for key in (1_000..3_000).filter(|k| k % 20 == round) {
                    table.remove(&key);
                }
            }
        });
        for _ in 0..4 {
            let misses = &misses;
            scope.execute(move || {
                for _ in 0..20 {
                    for key in 0..1_000 {
                        match table.get(&key) {
                            Some(v) => assert_eq!(v, key),
                            None => {
                                misses.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            });
        }
    });
    assert_eq!(misses.load(Ordering::Relaxed), 0);
    assert_eq!(table.len(), 1_000);
}

/// Removals racing each other: each key is handed out exactly once.
#[test]
fn stress_each_key_removed_once() {
    let table = table(2);
    let total = 20_000;
    for key in 0..total {
        table.put(key, key);
    }
    let removed = AtomicUsize::new(0);
    let mut pool = Pool::new(8);
    pool.scoped(|scope| {
        for _ in 0..8 {
            let (table, removed) = (&table, &removed);
            scope.execute(move || {
                for key in 0..total {
                    if table.remove(&key).is_some() {
                        removed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(removed.load(Ordering::Relaxed), total);
    assert!(table.is_empty());
}

/// Sampling while writers run must not crash or return stale keys in bulk.
#[test]
fn stress_expirable_under_writes() {
    let table = table(4);
    let mut pool = Pool::new(6);
    pool.scoped(|scope| {
        for t in 0..4 {
            let table = &table;
            scope.execute(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = t * OPS_PER_THREAD + i;
                    table.put(key, key);
                    if i % 3 == 0 {
                        table.remove(&key);
                    }
                }
            });
        }
        for _ in 0..2 {
            let table = &table;
            scope.execute(move || {
                for _ in 0..200 {
                    let victims = table.expirable(8, |a, b| a.cmp(b));
                    assert!(victims.len() <= 8);
                }
            });
        }
    });
    let expected = 4 * (OPS_PER_THREAD - (OPS_PER_THREAD + 2) / 3);
    assert_eq!(table.len(), expected);
}

/// The record cache stays usable and bounded-ish under concurrent churn.
#[test]
fn stress_record_cache_churn() {
    let config = RecordCacheConfig::new(1_000)
        .with_table(TableConfig::new().with_segments(8));
    let cache: RecordCache<usize, usize> = RecordCache::new(config);
    let mut pool = Pool::new(8);
    pool.scoped(|scope| {
        for t in 0..8 {
            let cache = &cache;
            scope.execute(move || {
                for i in 0..2_000 {
                    let key = (t * 2_000 + i) % 3_000;
                    let mut record = cache.new_record(ClassId(1), i as u64, 2);
                    record.set(cache.allocator(), 0, Some(key));
                    cache.put(key, record);
                    if let Some(found) = cache.get(&key) {
                        // another thread may have stored the same key
                        assert_eq!(found.get(0), Some(&key));
                    }
                }
            });
        }
    });
    assert!(cache.len() <= 3_000);
    assert_eq!(cache.cache_metrics().puts(), 16_000);
}
