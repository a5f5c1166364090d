//! Caching benchmarks
//!
//! Measures `UnifiedCache` performance: hit/miss latency, a mixed
//! 80/20 workload, admission under a tight memory cap, and stats
//! snapshot cost.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use router_core::cache::{CacheConfig, UnifiedCache};
use std::sync::atomic::{AtomicU64, Ordering};

fn test_cache() -> UnifiedCache {
    UnifiedCache::new(CacheConfig {
        enable_disk_cache: false,
        ..CacheConfig::default()
    })
    .unwrap()
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = test_cache();
    for i in 0..100 {
        let key = format!("key-{i}");
        cache.set(&key, serde_json::json!({"v": i}), 1800, "responses", 3).unwrap();
    }

    let mut group = c.benchmark_group("caching/hit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("warm_cache", |b| {
        b.iter(|| {
            let key = format!("key-{}", black_box(42));
            let _ = cache.get(black_box(&key));
        });
    });
    group.finish();
}

fn bench_cache_miss(c: &mut Criterion) {
    let cache = test_cache();
    let counter = AtomicU64::new(0);

    let mut group = c.benchmark_group("caching/miss");
    group.throughput(Throughput::Elements(1));
    group.bench_function("cold_cache", |b| {
        b.iter(|| {
            let count = counter.fetch_add(1, Ordering::Relaxed);
            let key = format!("nonexistent-{count}");
            let _ = cache.get(black_box(&key));
        });
    });
    group.finish();
}

fn bench_mixed_workload(c: &mut Criterion) {
    let cache = test_cache();
    for i in 0..80 {
        let key = format!("key-{i}");
        cache.set(&key, serde_json::json!({"v": i}), 1800, "responses", 3).unwrap();
    }

    let mut group = c.benchmark_group("caching/mixed");
    group.throughput(Throughput::Elements(1));
    let counter = AtomicU64::new(0);
    group.bench_function("80_20_hit_miss", |b| {
        b.iter(|| {
            let count = counter.fetch_add(1, Ordering::Relaxed);
            let key = if count % 5 == 0 {
                format!("nonexistent-{count}")
            } else {
                format!("key-{}", count % 80)
            };
            let _ = cache.get(black_box(&key));
        });
    });
    group.finish();
}

fn bench_eviction(c: &mut Criterion) {
    let cache = UnifiedCache::new(CacheConfig {
        max_entries: 10,
        max_memory_mb: 1,
        enable_disk_cache: false,
        ..CacheConfig::default()
    })
    .unwrap();

    let mut group = c.benchmark_group("caching/eviction");
    group.throughput(Throughput::Elements(1));
    let counter = AtomicU64::new(0);
    group.bench_function("admission_with_eviction", |b| {
        b.iter(|| {
            let count = counter.fetch_add(1, Ordering::Relaxed);
            let key = format!("key-{count}");
            let _ = cache.set(black_box(&key), black_box(serde_json::json!("x")), 1800, "responses", 3);
        });
    });
    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let cache = test_cache();
    for i in 0..50 {
        let key = format!("key-{i}");
        cache.set(&key, serde_json::json!({"v": i}), 1800, "responses", 3).unwrap();
    }
    for i in 0..100 {
        let key = if i % 2 == 0 { format!("key-{}", i % 50) } else { format!("miss-{i}") };
        let _ = cache.get(&key);
    }

    let mut group = c.benchmark_group("caching/stats");
    group.bench_function("stats_snapshot", |b| {
        b.iter(|| cache.stats());
    });
    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_cache_miss, bench_mixed_workload, bench_eviction, bench_stats);
criterion_main!(benches);
