//! # Allocator Property Tests
//!
//! Behavioural checks of the memory system through its public API:
//!
//! 1. **Blocks**: round-trip, merge back to baseline, in-place growth, shrink
//! 2. **Caches**: hot sizes are served from the frequency cache
//! 3. **Chain**: context nesting, forwarding, destroyed owners
//! 4. **Threads**: concurrent allocation with scoped contexts
//!
//! Run with: cargo test -p strata_core --test allocator_properties

use std::thread;
use std::time::{Duration, Instant};

use strata_core::{
    kb, mb, Allocator, ArenaId, BlockPtr, MemoryConfig, MemoryError, MemorySystem, HEADER_SIZE,
};

fn system(budget: usize) -> MemorySystem {
    MemorySystem::new(MemoryConfig::with_budget(budget)).unwrap()
}

/// Deterministic sizes for the sequence tests.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) as usize % bound) + 1
    }
}

// ============================================================================
// BLOCKS
// ============================================================================

#[test]
fn test_round_trip_without_aliasing() {
    let system = system(mb(2));
    let level = system.create_arena(kb(256)).unwrap();
    let mut rng = Lcg(7);

    let blocks: Vec<(BlockPtr, usize)> = (0..200)
        .map(|i| {
            let size = rng.next(300);
            let ptr = level.try_allocate(size).unwrap();
            let pattern = vec![(i % 251) as u8; size];
            system.write(ptr, 0, &pattern).unwrap();
            (ptr, size)
        })
        .collect();

    for (i, (ptr, size)) in blocks.iter().enumerate() {
        let mut out = vec![0u8; *size];
        system.read(*ptr, 0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == (i % 251) as u8), "block {i} was overwritten");
    }
}

#[test]
fn test_free_everything_merges_back_to_baseline() {
    let system = system(mb(4));
    let level = system.create_arena(mb(1)).unwrap();
    let baseline = level.used();
    assert_eq!(baseline, HEADER_SIZE);

    let mut rng = Lcg(42);
    let mut live = Vec::new();
    for step in 0..2_000 {
        if live.is_empty() || rng.next(2) == 1 {
            live.push(level.try_allocate(rng.next(512)).unwrap());
        } else {
            let victim = rng.next(live.len()) - 1;
            level.try_deallocate(live.swap_remove(victim)).unwrap();
        }
        if step % 500 == 0 {
            level.merge_adjacent_blocks();
        }
    }
    for ptr in live.drain(..) {
        level.try_deallocate(ptr).unwrap();
    }

    level.release_retained();
    level.merge_adjacent_blocks();
    assert_eq!(level.used(), baseline);
    assert_eq!(level.stats().block_count, 1);
    assert_eq!(level.stats().largest_free, level.capacity() - HEADER_SIZE);
}

#[test]
fn test_growth_into_free_neighbour_keeps_pointer() {
    let system = system(mb(1));
    let level = system.create_arena(kb(64)).unwrap();
    let a = level.try_allocate(64).unwrap();
    let b = level.try_allocate(256).unwrap();
    let _fence = level.try_allocate(16).unwrap();
    system.write(a, 0, &[9u8; 64]).unwrap();

    level.try_deallocate(b).unwrap();
    level.release_retained();

    let grown = level.try_reallocate(a, 128).unwrap();
    assert_eq!(grown, a);
    assert_eq!(system.size_of(a).unwrap(), 128);
    let mut out = [0u8; 64];
    system.read(a, 0, &mut out).unwrap();
    assert_eq!(out, [9u8; 64]);
    assert_eq!(level.stats().in_place_growths, 1);
}

#[test]
fn test_shrink_never_moves() {
    let system = system(mb(1));
    let level = system.create_arena(kb(64)).unwrap();
    let ptr = level.try_allocate(1024).unwrap();
    let _fence = level.try_allocate(16).unwrap();
    system.write(ptr, 0, &[5u8; 32]).unwrap();

    for size in [1000, 512, 500, 64, 40, 8, 1] {
        assert_eq!(level.try_reallocate(ptr, size).unwrap(), ptr, "shrink to {size}");
    }
    let mut out = [0u8; 8];
    system.read(ptr, 0, &mut out).unwrap();
    assert_eq!(out, [5u8; 8]);
}

#[test]
fn test_deallocate_all_resets_arena() {
    let system = system(mb(1));
    let level = system.create_arena(kb(32)).unwrap();
    let ptrs: Vec<_> = (0..10).map(|_| level.try_allocate(100).unwrap()).collect();
    level.deallocate_all();
    assert_eq!(level.used(), HEADER_SIZE);
    assert!(matches!(
        level.try_deallocate(ptrs[3]),
        Err(MemoryError::InvalidPointer { .. })
    ));
}

#[test]
fn test_back_adjacent_frees_collapse_on_merge_interval() {
    let config = MemoryConfig::with_budget(mb(1))
        .with_pool_fraction(0)
        .with_frequency_fraction(0)
        .with_merge_interval(2);
    let system = MemorySystem::new(config).unwrap();
    let level = system.create_arena(kb(16)).unwrap();
    let a = level.try_allocate(64).unwrap();
    let b = level.try_allocate(64).unwrap();
    let _fence = level.try_allocate(16).unwrap();
    let count = level.stats().block_count;

    level.try_deallocate(a).unwrap();
    assert_eq!(level.stats().block_count, count);
    level.try_deallocate(b).unwrap();
    assert_eq!(level.stats().block_count, count - 1);
    assert_eq!(system.size_of(a).ok(), None);
}

#[test]
fn test_unaddressable_request_is_exhaustion() {
    let system = system(mb(1));
    let level = system.create_arena(kb(16)).unwrap();
    let before = level.used();
    assert!(matches!(
        level.try_allocate(usize::MAX - 2),
        Err(MemoryError::Exhausted { arena, .. }) if arena == level.id()
    ));
    assert_eq!(level.used(), before);
}

// ============================================================================
// CACHES
// ============================================================================

#[test]
fn test_hot_size_is_served_from_frequency_cache() {
    let config = MemoryConfig::with_budget(mb(1))
        .with_hot_sizes(20.0, Duration::from_millis(20))
        .with_pool_fraction(0);
    let system = MemorySystem::new(config).unwrap();
    let level = system.create_arena(kb(64)).unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(40) {
        let ptr = level.try_allocate(48).unwrap();
        level.try_deallocate(ptr).unwrap();
    }
    for _ in 0..4 {
        let ptr = level.try_allocate(48).unwrap();
        level.try_deallocate(ptr).unwrap();
    }

    let stats = level.stats();
    assert!(stats.frequency_hits > 0, "{stats:?}");
    assert_eq!(stats.cached_blocks, 1);
    assert_eq!(stats.cached_bytes, 48);
}

#[test]
fn test_idle_hot_size_cache_is_purged() {
    let config = MemoryConfig::with_budget(mb(1))
        .with_hot_sizes(1.0, Duration::ZERO)
        .with_purge(1, Duration::from_millis(10))
        .with_pool_fraction(0);
    let system = MemorySystem::new(config).unwrap();
    let level = system.create_arena(kb(64)).unwrap();

    let ptr = level.try_allocate(48).unwrap();
    level.try_deallocate(ptr).unwrap();
    assert_eq!(level.stats().cached_blocks, 1);

    thread::sleep(Duration::from_millis(30));
    let _other = level.try_allocate(200).unwrap();
    let stats = level.stats();
    assert_eq!(stats.cached_blocks, 0);
    assert_eq!(stats.used, 3 * HEADER_SIZE + 200);
}

#[test]
fn test_pooled_block_is_reused() {
    let config = MemoryConfig::with_budget(mb(1)).with_frequency_fraction(0);
    let system = MemorySystem::new(config).unwrap();
    let level = system.create_arena(kb(64)).unwrap();

    let a = level.try_allocate(200).unwrap();
    let _fence = level.try_allocate(16).unwrap();
    level.try_deallocate(a).unwrap();
    assert_eq!(level.stats().pooled_blocks, 1);

    let b = level.try_allocate(200).unwrap();
    assert_eq!(a, b);
    assert_eq!(level.stats().pool_hits, 1);
}

// ============================================================================
// CHAIN
// ============================================================================

#[test]
fn test_context_nesting_restores_exactly() {
    let system = system(mb(2));
    let a = system.create_arena(kb(64)).unwrap();
    let b = system.create_arena(kb(64)).unwrap();

    let outer = system.push_current(&a);
    assert_eq!(system.current(), a.id());
    let inner = system.push_current(&b);
    assert_eq!(system.current(), b.id());

    let ptr = system.try_allocate(32).unwrap();
    assert_eq!(ptr.owner(), Some(b.id()));
    let scoped = inner.try_allocate(32).unwrap();
    assert_eq!(scoped.owner(), Some(b.id()));

    assert_eq!(inner.pop(), b.id());
    assert_eq!(system.current(), a.id());
    assert_eq!(outer.pop(), a.id());
    assert_eq!(system.current(), ArenaId::GLOBAL);
    assert_eq!(system.context_depth(), 1);
}

#[test]
fn test_out_of_order_pop_removes_own_frame() {
    let system = system(mb(2));
    let a = system.create_arena(kb(64)).unwrap();
    let b = system.create_arena(kb(64)).unwrap();

    let outer = system.push_current(&a);
    let inner = system.push_current(&b);
    assert_eq!(outer.pop(), a.id());
    assert_eq!(system.current(), b.id());
    assert_eq!(system.context_depth(), 2);

    assert_eq!(inner.pop(), b.id());
    assert_eq!(system.current(), ArenaId::GLOBAL);
    assert_eq!(system.context_depth(), 1);
}

#[test]
fn test_scope_guard_pops_on_drop() {
    let system = system(mb(1));
    let level = system.create_arena(kb(32)).unwrap();
    let before = system.stats(ArenaId::GLOBAL).unwrap().used;
    {
        let _scope = system.push_current_id(level.id());
        assert_eq!(system.current(), level.id());
    }
    assert_eq!(system.current(), ArenaId::GLOBAL);
    system.arena(ArenaId::GLOBAL).unwrap().release_retained();
    assert_eq!(system.stats(ArenaId::GLOBAL).unwrap().used, before);
}

#[test]
fn test_foreign_pointers_are_forwarded() {
    let system = system(mb(2));
    let shallow = system.create_arena(kb(64)).unwrap();
    let deep = system.create_arena(kb(64)).unwrap();

    let in_shallow = shallow.try_allocate(64).unwrap();
    let in_deep = deep.try_allocate(64).unwrap();
    system.write(in_deep, 0, b"forwarded").unwrap();

    // deeper to shallower
    deep.try_deallocate(in_shallow).unwrap();
    assert!(system.size_of(in_shallow).is_err());

    // shallower to deeper, through the global context
    let moved = system.try_reallocate(in_deep, kb(8)).unwrap();
    assert_eq!(moved.owner(), Some(deep.id()));
    let mut out = [0u8; 9];
    system.read(moved, 0, &mut out).unwrap();
    assert_eq!(&out, b"forwarded");
    system.try_deallocate(moved).unwrap();
}

#[test]
fn test_destroyed_owner_is_reported_as_leak() {
    let system = system(mb(1));
    let level = system.create_arena(kb(32)).unwrap();
    let ptr = level.try_allocate(64).unwrap();
    let id = level.id();
    drop(level);

    assert!(matches!(
        system.try_deallocate(ptr),
        Err(MemoryError::UnreachableOwner { owner, .. }) if owner == id
    ));
    // the process-facing form only logs
    system.deallocate(ptr);
    assert!(system.size_of(ptr).is_err());
}

#[test]
fn test_stale_pointer_after_teardown_cannot_touch_reused_ids() {
    let system = system(mb(2));
    let first = system.create_arena(kb(32)).unwrap();
    let second = system.create_arena(kb(32)).unwrap();
    let stale = second.try_allocate(16).unwrap();
    drop(second);
    drop(first);

    let _first = system.create_arena(kb(32)).unwrap();
    let second = system.create_arena(kb(32)).unwrap();
    let live = second.try_allocate(16).unwrap();
    assert_eq!(stale.owner(), live.owner());
    assert_eq!(stale.offset(), live.offset());
    assert_ne!(stale, live);

    assert!(matches!(
        system.try_deallocate(stale),
        Err(MemoryError::UnreachableOwner { .. })
    ));
    assert!(matches!(
        second.try_deallocate(stale),
        Err(MemoryError::UnreachableOwner { .. })
    ));
    assert_eq!(system.size_of(live).unwrap(), 16);
}

#[test]
fn test_exhaustion_is_reported_by_try_allocate() {
    let system = system(mb(1));
    let level = system.create_arena(kb(4)).unwrap();
    assert!(matches!(
        level.try_allocate(kb(8)),
        Err(MemoryError::Exhausted { arena, .. }) if arena == level.id()
    ));
}

// ============================================================================
// THREADS
// ============================================================================

#[test]
fn test_concurrent_allocation() {
    let system = system(mb(4));
    let level = system.create_arena(kb(512)).unwrap();

    thread::scope(|s| {
        for t in 0..4u8 {
            let system = &system;
            let level = &level;
            s.spawn(move || {
                for i in 0..250 {
                    let ptr = level.try_allocate(16 + usize::from(t) * 8).unwrap();
                    system.write(ptr, 0, &[t; 16]).unwrap();
                    let mut out = [0u8; 16];
                    system.read(ptr, 0, &mut out).unwrap();
                    assert_eq!(out, [t; 16]);
                    level.try_deallocate(ptr).unwrap();

                    if i % 10 == 0 {
                        let scope = system.push_current(level);
                        let ptr = system.try_allocate(32).unwrap();
                        assert_eq!(ptr.owner(), Some(level.id()));
                        system.try_deallocate(ptr).unwrap();
                        assert_eq!(scope.pop(), level.id());
                    }
                }
            });
        }
    });

    assert_eq!(system.context_depth(), 1);
    level.release_retained();
    level.merge_adjacent_blocks();
    assert_eq!(level.used(), HEADER_SIZE);
}

#[test]
fn test_passthrough_keeps_context_stack() {
    let config = MemoryConfig::with_budget(kb(64)).with_passthrough(true);
    let system = MemorySystem::new(config).unwrap();
    let level = system.create_arena(kb(8)).unwrap();

    let scope = system.push_current(&level);
    assert_eq!(system.current(), level.id());
    let ptr = system.try_allocate(mb(1)).unwrap();
    assert_eq!(ptr.owner(), None);
    system.write_pod(ptr, 0, &7u64).unwrap();
    assert_eq!(system.read_pod::<u64>(ptr, 0).unwrap(), 7);
    system.try_deallocate(ptr).unwrap();
    assert_eq!(scope.pop(), level.id());
}
