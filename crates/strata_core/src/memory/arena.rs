//! # Arena
//!
//! One fixed-capacity buffer with its block list, free pools, and hot-size
//! cache. Everything here works on blocks this arena owns; forwarding of
//! foreign pointers happens in the [`chain`](super::chain).

use std::fs;
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;

use super::block::{header_of, payload_of, BlockList, BlockState, HEADER_SIZE};
use super::frequency::{FrequencyPolicy, FrequencyTracker};
use super::pool::{entries_for, FreePools};
use super::stats::{ArenaStats, UsageHistogram};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::id::{ArenaId, BlockPtr};
use crate::size::{checked_align, format_size, WORD};

/// Byte pattern written over a reset arena's payloads.
pub const POISON_BYTE: u8 = 0xFC;

/// Allocation path counters.
#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    frequency_hits: u64,
    pool_hits: u64,
    scan_allocations: u64,
    in_place_growths: u64,
    merges: u64,
}

/// Per-arena cadence settings taken from the config.
#[derive(Clone, Copy, Debug)]
struct Cadence {
    merge_interval: u32,
    purge_interval: u32,
    poison_on_reset: bool,
}

/// State guarded by the arena lock.
#[derive(Debug)]
struct ArenaState {
    blocks: BlockList,
    storage: Box<[u8]>,
    pools: FreePools,
    frequency: FrequencyTracker,
    merge_countdown: u32,
    purge_countdown: u32,
    counters: Counters,
}

/// A fixed-capacity arena.
///
/// # Thread Safety
///
/// All state sits behind one mutex; every public method takes it for the
/// duration of the call and nothing else.
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    generation: u16,
    capacity: usize,
    cadence: Cadence,
    state: Mutex<ArenaState>,
}

impl Arena {
    /// Creates an arena of `capacity` bytes.
    ///
    /// `capacity` must exceed two block headers.
    #[must_use]
    pub fn new(id: ArenaId, generation: u16, capacity: usize, config: &MemoryConfig) -> Self {
        let pool_budget = capacity.checked_div(config.pool_fraction).unwrap_or(0);
        let frequency_budget = capacity.checked_div(config.frequency_fraction).unwrap_or(0);
        let policy = FrequencyPolicy {
            hot_threshold: config.hot_threshold,
            sample_interval: config.sample_interval,
            idle_timeout: config.idle_timeout,
            budget: frequency_budget,
        };
        let merge_interval = config.merge_interval.max(1);
        let purge_interval = config.purge_interval.max(1);

        Self {
            id,
            generation,
            capacity,
            cadence: Cadence {
                merge_interval,
                purge_interval,
                poison_on_reset: config.poison_on_reset,
            },
            state: Mutex::new(ArenaState {
                blocks: BlockList::new(capacity),
                storage: vec![0u8; capacity].into_boxed_slice(),
                pools: FreePools::new(pool_entries(capacity, config), pool_budget),
                frequency: FrequencyTracker::new(policy),
                merge_countdown: merge_interval,
                purge_countdown: purge_interval,
                counters: Counters::default(),
            }),
        }
    }

    /// This arena's id (its depth in the chain).
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArenaId {
        self.id
    }

    /// Generation of the chain slot this arena occupies.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u16 {
        self.generation
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Header bytes plus payload bytes not plainly free.
    #[must_use]
    pub fn used(&self) -> usize {
        self.state.lock().blocks.used()
    }

    /// Number of blocks in the list.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Returns true if `ptr` was handed out by this arena instance.
    #[inline]
    #[must_use]
    pub fn issued(&self, ptr: BlockPtr) -> bool {
        ptr.owner() == Some(self.id) && ptr.generation() == self.generation
    }

    /// Allocates `size` bytes, rounded up to a word.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Exhausted`] when no block fits, even after retained
    /// blocks were released and free runs merged.
    pub fn allocate(&self, size: usize) -> MemoryResult<BlockPtr> {
        let mut state = self.state.lock();
        let header = self.allocate_locked(&mut state, size)?;
        Ok(self.pointer(header))
    }

    /// Resizes the block behind `ptr`, in place when possible.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidPointer`] if this arena does not own `ptr`;
    /// [`MemoryError::Exhausted`] if the block must move and nothing fits.
    pub fn reallocate(&self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr> {
        let mut state = self.state.lock();
        let header = self.locate(&state, ptr)?;
        let size = self.request_size(&state, size)?;
        let Some(block) = state.blocks.get(header).copied() else {
            return Err(self.invalid(ptr));
        };
        if size == block.size {
            return Ok(ptr);
        }

        if size < block.size {
            let diff = block.size - size;
            let next_free = block
                .next
                .and_then(|n| state.blocks.get(n))
                .is_some_and(|n| n.state.is_free());
            if next_free {
                state.blocks.shift_boundary(header, -signed(diff));
            } else if diff > HEADER_SIZE {
                state.blocks.split(header, size);
            }
            // otherwise the block keeps its slack; it still holds the data
            return Ok(ptr);
        }

        let diff = size - block.size;
        if let Some(next) = block.next.and_then(|n| state.blocks.get(n)).copied() {
            if next.state.is_free() {
                let grown = state.blocks.shift_boundary(header, signed(diff))
                    || (next.size + HEADER_SIZE >= diff && state.blocks.absorb_next(header));
                if grown {
                    state.counters.in_place_growths += 1;
                    return Ok(ptr);
                }
            }
        }

        let moved = self.allocate_locked(&mut state, size)?;
        let src = payload_of(header);
        state
            .storage
            .copy_within(src..src + block.size, payload_of(moved));
        self.release_locked(&mut state, header);
        Ok(self.pointer(moved))
    }

    /// Frees the block behind `ptr`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidPointer`] if this arena does not own `ptr`.
    pub fn deallocate(&self, ptr: BlockPtr) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let header = self.locate(&state, ptr)?;
        self.release_locked(&mut state, header);
        Ok(())
    }

    /// Frees everything: one free block over the whole buffer, empty pools
    /// and caches.
    pub fn deallocate_all(&self) {
        let mut state = self.state.lock();
        state.blocks.reset();
        state.pools.clear();
        state.frequency.clear();
        state.merge_countdown = self.cadence.merge_interval;
        state.purge_countdown = self.cadence.purge_interval;
        if self.cadence.poison_on_reset {
            state.storage[HEADER_SIZE..].fill(POISON_BYTE);
        }
        tracing::debug!(arena = %self.id, "arena reset");
    }

    /// Merges every run of adjacent free blocks. Returns headers removed.
    pub fn merge_adjacent_blocks(&self) -> usize {
        let mut state = self.state.lock();
        self.merge_locked(&mut state)
    }

    /// Hands pooled and hot-cached blocks back to the free list, then merges.
    ///
    /// Returns the number of blocks released.
    pub fn release_retained(&self) -> usize {
        let mut state = self.state.lock();
        let released = release_retained_locked(&mut state);
        self.merge_locked(&mut state);
        released
    }

    /// Payload size of the block behind `ptr`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidPointer`] if this arena does not own `ptr`.
    pub fn size_of(&self, ptr: BlockPtr) -> MemoryResult<usize> {
        let state = self.state.lock();
        let header = self.locate(&state, ptr)?;
        state
            .blocks
            .get(header)
            .map(|b| b.size)
            .ok_or_else(|| self.invalid(ptr))
    }

    /// Runs `f` over the payload of `ptr`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidPointer`] if this arena does not own `ptr`.
    pub fn with_payload<R>(&self, ptr: BlockPtr, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        let state = self.state.lock();
        let range = self.payload_range(&state, ptr)?;
        Ok(f(&state.storage[range]))
    }

    /// Runs `f` over the payload of `ptr`, mutably.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidPointer`] if this arena does not own `ptr`.
    pub fn with_payload_mut<R>(
        &self,
        ptr: BlockPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> MemoryResult<R> {
        let mut state = self.state.lock();
        let range = self.payload_range(&state, ptr)?;
        Ok(f(&mut state.storage[range]))
    }

    /// Snapshot of usage and allocation-path counters.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();
        let used = state.blocks.used();
        ArenaStats {
            id: self.id,
            capacity: self.capacity,
            used,
            block_count: state.blocks.len(),
            free_bytes: self.capacity - used,
            largest_free: state.blocks.largest_free(),
            pooled_blocks: state.pools.len(),
            pooled_bytes: state.pools.bytes(),
            cached_blocks: state.frequency.cached_blocks(),
            cached_bytes: state.frequency.cached_bytes(),
            frequency_hits: state.counters.frequency_hits,
            pool_hits: state.counters.pool_hits,
            scan_allocations: state.counters.scan_allocations,
            in_place_growths: state.counters.in_place_growths,
            merges: state.counters.merges,
        }
    }

    /// Block counts grouped by exact size. Merges free runs first.
    #[must_use]
    pub fn histogram(&self) -> UsageHistogram {
        let mut state = self.state.lock();
        self.merge_locked(&mut state);
        let mut histogram = UsageHistogram::default();
        for (_, block) in state.blocks.iter() {
            histogram.record(block.size, !block.state.is_free());
        }
        histogram
    }

    /// Writes the raw buffer to `path`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Io`] if the file cannot be written.
    pub fn dump(&self, path: &Path) -> MemoryResult<()> {
        let state = self.state.lock();
        fs::write(path, &state.storage)?;
        Ok(())
    }

    fn allocate_locked(&self, state: &mut ArenaState, size: usize) -> MemoryResult<usize> {
        let size = self.request_size(state, size)?;
        let now = Instant::now();
        state.frequency.note_allocation(size, now);

        let header = if let Some(header) = state.frequency.take(size) {
            state.counters.frequency_hits += 1;
            state.blocks.set_state(header, BlockState::Owned(self.id));
            header
        } else if let Some((header, _)) = state.pools.take(size) {
            state.counters.pool_hits += 1;
            state.blocks.set_state(header, BlockState::Owned(self.id));
            state.blocks.split(header, size);
            header
        } else {
            let found = match state.blocks.first_fit(size) {
                Some(header) => Some(header),
                None => {
                    release_retained_locked(state);
                    self.merge_locked(state);
                    state.blocks.first_fit(size)
                }
            };
            let Some(header) = found else {
                return Err(self.exhausted(state, size));
            };
            state.counters.scan_allocations += 1;
            state.blocks.split(header, size);
            state.blocks.set_state(header, BlockState::Owned(self.id));
            header
        };

        state.purge_countdown -= 1;
        if state.purge_countdown == 0 {
            state.purge_countdown = self.cadence.purge_interval;
            for retained in state.frequency.purge(now) {
                state.blocks.set_state(retained, BlockState::Free);
            }
        }
        Ok(header)
    }

    fn release_locked(&self, state: &mut ArenaState, header: usize) {
        let Some(block) = state.blocks.get(header).copied() else {
            return;
        };
        debug_assert_eq!(block.state, BlockState::Owned(self.id));

        if state.frequency.offer(block.size, header) || state.pools.insert(header, block.size) {
            state.blocks.set_state(header, BlockState::Retained);
            return;
        }

        state.blocks.set_state(header, BlockState::Free);
        // no back links, so only merge forward here and sweep from the
        // front every so often
        state.blocks.absorb_next(header);
        state.merge_countdown -= 1;
        if state.merge_countdown == 0 {
            self.merge_locked(state);
        }
    }

    /// Word-aligned payload size for a request that could ever fit.
    fn request_size(&self, state: &ArenaState, size: usize) -> MemoryResult<usize> {
        match checked_align(size) {
            Some(aligned) if aligned <= self.capacity => Ok(aligned.max(WORD)),
            _ => Err(self.exhausted(state, size)),
        }
    }

    fn exhausted(&self, state: &ArenaState, requested: usize) -> MemoryError {
        let available = self.capacity - state.blocks.used();
        tracing::error!(
            arena = %self.id,
            requested = %format_size(requested),
            available = %format_size(available),
            "arena exhausted"
        );
        MemoryError::Exhausted {
            arena: self.id,
            requested,
            available,
        }
    }

    fn merge_locked(&self, state: &mut ArenaState) -> usize {
        state.merge_countdown = self.cadence.merge_interval;
        let merged = state.blocks.merge_free_runs();
        state.counters.merges += merged as u64;
        merged
    }

    fn locate(&self, state: &ArenaState, ptr: BlockPtr) -> MemoryResult<usize> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        if !self.issued(ptr) {
            return Err(self.invalid(ptr));
        }
        let header = header_of(ptr.offset()).ok_or_else(|| self.invalid(ptr))?;
        match state.blocks.get(header) {
            Some(block) if block.state == BlockState::Owned(self.id) => Ok(header),
            _ => Err(self.invalid(ptr)),
        }
    }

    fn payload_range(
        &self,
        state: &ArenaState,
        ptr: BlockPtr,
    ) -> MemoryResult<std::ops::Range<usize>> {
        let header = self.locate(state, ptr)?;
        let size = state
            .blocks
            .get(header)
            .map(|b| b.size)
            .ok_or_else(|| self.invalid(ptr))?;
        let start = payload_of(header);
        Ok(start..start + size)
    }

    #[inline]
    fn pointer(&self, header: usize) -> BlockPtr {
        BlockPtr::new(self.id, self.generation, payload_of(header))
    }

    #[inline]
    fn invalid(&self, ptr: BlockPtr) -> MemoryError {
        MemoryError::InvalidPointer { ptr, arena: self.id }
    }
}

/// Pool entries provisioned for an arena; none when pools are disabled.
pub(crate) fn pool_entries(capacity: usize, config: &MemoryConfig) -> usize {
    if config.pool_fraction == 0 {
        0
    } else {
        entries_for(capacity, config.pool_fraction)
    }
}

fn release_retained_locked(state: &mut ArenaState) -> usize {
    let mut released = state.pools.drain();
    released.append(&mut state.frequency.drain());
    for &header in &released {
        state.blocks.set_state(header, BlockState::Free);
    }
    released.len()
}

#[inline]
#[allow(clippy::cast_possible_wrap)]
fn signed(n: usize) -> isize {
    n as isize
}
