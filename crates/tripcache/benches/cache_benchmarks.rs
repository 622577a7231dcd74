use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tripcache::{
    compression, Cache, CacheConfig, NoopPersistence, SetOptions, StrategyManager,
};

fn cache_with_capacity(max_size: usize) -> Cache {
    let config = CacheConfig {
        max_size,
        ..Default::default()
    };
    Cache::builder()
        .config(config)
        .persistence(Arc::new(NoopPersistence))
        .build()
        .unwrap()
}

// ============================================================================
// Benchmark 1: Lookup Performance
// ============================================================================
// Validates: Hits stay flat as the store grows

fn benchmark_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit");
    group.sample_size(100);

    for size in [100usize, 1_000, 10_000].iter() {
        let cache = cache_with_capacity(*size);
        for i in 0..*size {
            cache
                .set(&format!("trips:{}", i), &i, SetOptions::new())
                .unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let _ = cache.get_value(black_box("trips:42"));
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark 2: Write Performance Under Eviction
// ============================================================================
// Validates: Writes into a full store pay for one eviction batch at a time

fn benchmark_set_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_with_eviction");
    group.sample_size(50);

    for size in [100usize, 1_000].iter() {
        let cache = cache_with_capacity(*size);
        let mut next = 0usize;

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                next += 1;
                cache
                    .set(
                        &format!("trips:{}", next),
                        black_box(&next),
                        SetOptions::new().with_ttl(Duration::from_secs(60)),
                    )
                    .unwrap();
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark 3: Tag Invalidation
// ============================================================================

fn benchmark_invalidate_by_tags(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidate_by_tags");

    for tagged in [10usize, 100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(tagged), tagged, |b, &tagged| {
            b.iter_with_setup(
                || {
                    let cache = cache_with_capacity(tagged * 2);
                    for i in 0..tagged {
                        cache
                            .set(
                                &format!("search:{}", i),
                                &i,
                                SetOptions::new().with_tags(["search"]),
                            )
                            .unwrap();
                    }
                    cache
                },
                |cache| {
                    let _ = cache.invalidate_by_tags(black_box(&["search"]));
                },
            );
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark 4: Compression
// ============================================================================
// Validates: Search-sized payloads compress quickly enough for the write path

fn benchmark_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");

    for results in [10usize, 100, 1_000].iter() {
        let value = json!((0..*results)
            .map(|i| json!({ "id": i, "destination": "Lisbon", "nights": 3 }))
            .collect::<Vec<_>>());

        group.bench_with_input(BenchmarkId::new("compress", results), &value, |b, value| {
            b.iter(|| compression::compress(black_box(value.clone())));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark 5: Strategy Writes
// ============================================================================

fn benchmark_strategy_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy_set");
    let manager = StrategyManager::new(Arc::new(cache_with_capacity(10_000)));
    let value = json!({ "query": "lisbon", "results": [1, 2, 3, 4, 5] });

    for strategy in ["static", "dynamic", "search"].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(strategy), strategy, |b, &strategy| {
            b.iter(|| {
                manager
                    .set(black_box("search:lisbon"), &value, strategy, None)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_get_hit,
    benchmark_set_with_eviction,
    benchmark_invalidate_by_tags,
    benchmark_compression,
    benchmark_strategy_set
);
criterion_main!(benches);
