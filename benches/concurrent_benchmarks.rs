//! Concurrent Table Benchmarks
//!
//! Benchmarks for measuring table throughput across different access patterns
//! and segment configurations.

use closed_table::config::TableConfig;
use closed_table::Table;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

const TABLE_SIZE: usize = 10_000;
const OPS_PER_THREAD: usize = 1_000;
const THREADS: usize = 8;

fn make_table(segments: usize) -> Arc<Table<usize, usize>> {
    let table = Table::init(TableConfig::new().with_segments(segments), None);
    for i in 0..TABLE_SIZE {
        table.put(i, i);
    }
    Arc::new(table)
}

fn run_concurrent(table: &Arc<Table<usize, usize>>, write_percent: usize) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(table);
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = (t * OPS_PER_THREAD + i * 31) % TABLE_SIZE;
                    if i % 100 < write_percent {
                        table.put(key, i);
                    } else {
                        black_box(table.get(&key));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Read-only, mixed and write-heavy workloads
fn concurrent_mixes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Mixes");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let table = make_table(32);
    for write_percent in [0usize, 10, 50, 100] {
        group.bench_with_input(
            BenchmarkId::new("writes %", write_percent),
            &write_percent,
            |b, &write_percent| b.iter(|| run_concurrent(&table, write_percent)),
        );
    }
    group.finish();
}

/// Churn: inserting and removing disjoint keys forces close deletion and
/// occasional tombstones.
fn concurrent_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Churn");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD * 2) as u64));

    let table = make_table(32);
    group.bench_function("put remove", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let table = Arc::clone(&table);
                    thread::spawn(move || {
                        let base = TABLE_SIZE + t * OPS_PER_THREAD;
                        for key in base..base + OPS_PER_THREAD {
                            table.put(key, key);
                        }
                        for key in base..base + OPS_PER_THREAD {
                            black_box(table.remove(&key));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
    group.finish();
}

/// Compare segment counts under a 10% write mix
fn segment_count_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Segment Count");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for segments in [1usize, 4, 16, 64] {
        let table = make_table(segments);
        group.bench_with_input(BenchmarkId::from_parameter(segments), &segments, |b, _| {
            b.iter(|| run_concurrent(&table, 10));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    concurrent_mixes,
    concurrent_churn,
    segment_count_comparison
);
criterion_main!(benches);
