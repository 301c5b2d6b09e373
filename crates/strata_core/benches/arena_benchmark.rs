//! # Arena Allocation Benchmark
//!
//! Compares the three allocation paths of an arena:
//! 1. First-fit scan over the block list
//! 2. Size-class pool reuse
//! 3. Hot-size cache reuse

#![allow(missing_docs)]

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_core::{kb, mb, Allocator, MemoryConfig, MemorySystem};

const BATCH: usize = 1_000;

fn system(config: MemoryConfig) -> MemorySystem {
    MemorySystem::new(config).expect("benchmark config is valid")
}

/// Deterministic sizes between 8 and 1032 bytes.
fn generate_sizes(count: usize, seed: u64) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(count);
    let mut state = seed;
    for _ in 0..count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        sizes.push(8 + (state as usize) % 1024);
    }
    sizes
}

// =============================================================================
// SCAN PATH
// =============================================================================

fn bench_scan_batch(c: &mut Criterion) {
    let config = MemoryConfig::with_budget(mb(8))
        .with_pool_fraction(0)
        .with_frequency_fraction(0);
    let system = system(config);
    let level = system.create_arena(mb(4)).expect("arena fits");
    let sizes = generate_sizes(BATCH, 0x5EED);

    c.bench_function("scan_allocate_1k_mixed", |b| {
        b.iter(|| {
            for &size in &sizes {
                black_box(level.allocate(size));
            }
            level.deallocate_all();
        });
    });
}

// =============================================================================
// POOL PATH
// =============================================================================

fn bench_pool_reuse(c: &mut Criterion) {
    let config = MemoryConfig::with_budget(mb(8)).with_frequency_fraction(0);
    let system = system(config);
    let level = system.create_arena(mb(4)).expect("arena fits");
    let sizes = generate_sizes(64, 0xB0B);

    c.bench_function("pool_reuse_64_mixed", |b| {
        b.iter(|| {
            let ptrs: Vec<_> = sizes.iter().map(|&s| level.allocate(s)).collect();
            for ptr in ptrs {
                level.deallocate(black_box(ptr));
            }
        });
    });
}

// =============================================================================
// HOT-SIZE PATH
// =============================================================================

fn bench_hot_size(c: &mut Criterion) {
    let config = MemoryConfig::with_budget(mb(8))
        .with_pool_fraction(0)
        .with_hot_sizes(1.0, Duration::from_millis(1));
    let system = system(config);
    let level = system.create_arena(mb(1)).expect("arena fits");

    c.bench_function("hot_size_alloc_free_64", |b| {
        b.iter(|| {
            let ptr = level.allocate(64);
            level.deallocate(black_box(ptr));
        });
    });
}

fn bench_scoped_context(c: &mut Criterion) {
    let system = system(MemoryConfig::with_budget(mb(8)));
    let level = system.create_arena(kb(512)).expect("arena fits");

    c.bench_function("scoped_push_alloc_pop", |b| {
        b.iter(|| {
            let scope = system.push_current(&level);
            let ptr = system.allocate(128);
            system.deallocate(ptr);
            black_box(scope.pop())
        });
    });
}

criterion_group!(
    benches,
    bench_scan_batch,
    bench_pool_reuse,
    bench_hot_size,
    bench_scoped_context
);
criterion_main!(benches);
