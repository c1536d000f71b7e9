//! Pool allocator benchmarks.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use bytepool_core::{Arena, LocalCache, PoolConfig};

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");

    let arena = Arena::new(PoolConfig::default());
    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("pooled", size), &size, |b, &sz| {
            b.iter(|| {
                let handle = arena.allocate(sz).unwrap();
                arena.free(handle);
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    let arena = Arena::new(PoolConfig::default());
    group.bench_function("1000x64B_pooled", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..1000).map(|_| arena.allocate(64).unwrap()).collect();
            for handle in handles {
                arena.free(handle);
            }
        });
    });

    group.bench_function("1000x64B_system", |b| {
        b.iter(|| {
            let allocs: Vec<Vec<u8>> = (0..1000).map(|_| vec![0u8; 64]).collect();
            criterion::black_box(allocs);
        });
    });

    group.finish();
}

fn bench_thread_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_cache");

    let arena = Arc::new(Arena::new(PoolConfig::default()));
    let mut cache = LocalCache::new(Arc::clone(&arena));
    group.bench_function("cached_cycle_64B", |b| {
        b.iter(|| {
            let handle = cache.allocate(64).unwrap();
            cache.free(handle);
        });
    });

    group.bench_function("uncached_cycle_64B", |b| {
        b.iter(|| {
            let handle = arena.allocate(64).unwrap();
            arena.free(handle);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_thread_cache
);
criterion_main!(benches);
