//! # Arena Handle
//!
//! Owning handle to one arena in the chain. Dropping the handle unlinks
//! the arena and returns its buffers to the global arena.

use std::sync::Arc;

use crate::allocator::Allocator;
use crate::error::MemoryResult;
use crate::id::{ArenaId, BlockPtr};
use crate::memory::{Arena, ArenaStats};
use crate::system::MemorySystem;

/// A live arena created by [`MemorySystem::create_arena`].
///
/// Allocations through the handle land in its arena directly, whatever is
/// current. Reallocations and frees of blocks owned by other arenas are
/// forwarded along the chain.
///
/// # Destruction Order
///
/// Arenas are expected to be dropped in reverse creation order. Dropping one
/// that is not the deepest is allowed and logged; pointers into it become
/// unreachable and are reported as leaks when freed.
#[derive(Debug)]
pub struct ArenaHandle {
    system: MemorySystem,
    arena: Arc<Arena>,
    buffer: BlockPtr,
    pool_buffer: BlockPtr,
}

impl ArenaHandle {
    pub(crate) fn new(
        system: MemorySystem,
        arena: Arc<Arena>,
        buffer: BlockPtr,
        pool_buffer: BlockPtr,
    ) -> Self {
        Self {
            system,
            arena,
            buffer,
            pool_buffer,
        }
    }

    /// The arena's id (its depth in the chain).
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArenaId {
        self.arena.id()
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Bytes in use, headers included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.arena.used()
    }

    /// Usage snapshot.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// The underlying arena.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// The system this arena belongs to.
    #[inline]
    #[must_use]
    pub fn system(&self) -> &MemorySystem {
        &self.system
    }

    /// Frees every block in the arena at once.
    pub fn deallocate_all(&self) {
        self.arena.deallocate_all();
    }

    /// Merges adjacent free blocks. Returns headers removed.
    pub fn merge_adjacent_blocks(&self) -> usize {
        self.arena.merge_adjacent_blocks()
    }

    /// Returns pooled and hot-cached blocks to the free list.
    pub fn release_retained(&self) -> usize {
        self.arena.release_retained()
    }
}

impl Allocator for ArenaHandle {
    fn try_allocate(&self, size: usize) -> MemoryResult<BlockPtr> {
        self.system.allocate_in(&self.arena, size)
    }

    fn try_reallocate(&self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr> {
        self.system.reallocate_in(&self.arena, ptr, size)
    }

    fn try_deallocate(&self, ptr: BlockPtr) -> MemoryResult<()> {
        self.system.deallocate_in(&self.arena, ptr)
    }
}

impl Drop for ArenaHandle {
    fn drop(&mut self) {
        let id = self.arena.id();
        let inner = &self.system.inner;
        {
            let mut chain = inner.chain.write();
            let deepest = chain.deepest();
            if chain.detach(id).is_none() {
                return;
            }
            if id != deepest {
                tracing::warn!(
                    arena = %id,
                    deepest = %deepest,
                    "allocator destroyed out of creation order; blocks it owns become unreachable"
                );
            }
        }

        for reservation in [self.buffer, self.pool_buffer] {
            if reservation.is_null() {
                continue;
            }
            if let Err(err) = inner.global.deallocate(reservation) {
                tracing::warn!(arena = %id, error = %err, "failed to return arena buffer");
            }
        }
        tracing::debug!(arena = %id, "allocator destroyed");
    }
}
