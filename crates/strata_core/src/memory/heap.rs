//! # Passthrough Heap
//!
//! Backing store used when the system runs in passthrough mode: every
//! allocation gets its own boxed buffer. Requests fail only when the host
//! refuses the buffer or the pointer range is used up.

use std::collections::HashMap;

use super::block::HEADER_SIZE;
use crate::error::{MemoryError, MemoryResult};
use crate::id::{ArenaId, BlockPtr, MAX_OFFSET};
use crate::size::{checked_align, WORD};

/// Individually boxed allocations keyed by a synthetic offset.
#[derive(Debug)]
pub struct HeapStore {
    blocks: HashMap<usize, Box<[u8]>>,
    next_key: usize,
    bytes: usize,
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            next_key: HEADER_SIZE,
            bytes: 0,
        }
    }

    /// Live allocations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if nothing is allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Payload bytes held.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Allocates a zeroed buffer.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Exhausted`] if the buffer cannot be reserved or its
    /// key would not fit a pointer.
    pub fn allocate(&mut self, size: usize) -> MemoryResult<BlockPtr> {
        let size = request_size(size)?;
        let key = self.next_key;
        let next_key = key
            .checked_add(size)
            .and_then(|k| k.checked_add(HEADER_SIZE))
            .filter(|&k| k <= MAX_OFFSET)
            .ok_or_else(|| exhausted(size))?;
        let block = zeroed(size)?;
        self.next_key = next_key;
        self.blocks.insert(key, block);
        self.bytes += size;
        Ok(BlockPtr::heap(key))
    }

    /// Resizes a buffer, keeping its pointer.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NullPointer`] or [`MemoryError::InvalidPointer`]
    /// if `ptr` is not a live heap allocation; [`MemoryError::Exhausted`]
    /// if the new buffer cannot be reserved.
    pub fn reallocate(&mut self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr> {
        let block = self.lookup_mut(ptr)?;
        let size = request_size(size)?;
        let old = block.len();
        let mut resized = zeroed(size)?;
        let keep = old.min(size);
        resized[..keep].copy_from_slice(&block[..keep]);
        *block = resized;
        self.bytes = self.bytes + size - old;
        Ok(ptr)
    }

    /// Frees a buffer.
    ///
    /// # Errors
    ///
    /// As for [`HeapStore::reallocate`].
    pub fn deallocate(&mut self, ptr: BlockPtr) -> MemoryResult<()> {
        Self::check(ptr)?;
        let block = self
            .blocks
            .remove(&ptr.offset())
            .ok_or_else(|| Self::unreachable(ptr))?;
        self.bytes -= block.len();
        Ok(())
    }

    /// Borrows a buffer.
    ///
    /// # Errors
    ///
    /// As for [`HeapStore::reallocate`].
    pub fn lookup(&self, ptr: BlockPtr) -> MemoryResult<&[u8]> {
        Self::check(ptr)?;
        self.blocks
            .get(&ptr.offset())
            .map(|b| &b[..])
            .ok_or_else(|| Self::unreachable(ptr))
    }

    /// Borrows a buffer mutably.
    ///
    /// # Errors
    ///
    /// As for [`HeapStore::reallocate`].
    pub fn lookup_mut(&mut self, ptr: BlockPtr) -> MemoryResult<&mut Box<[u8]>> {
        Self::check(ptr)?;
        self.blocks
            .get_mut(&ptr.offset())
            .ok_or_else(|| Self::unreachable(ptr))
    }

    fn check(ptr: BlockPtr) -> MemoryResult<()> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        if ptr.owner().is_some() {
            return Err(Self::unreachable(ptr));
        }
        Ok(())
    }

    fn unreachable(ptr: BlockPtr) -> MemoryError {
        MemoryError::InvalidPointer {
            ptr,
            arena: ptr.owner().unwrap_or(ArenaId::GLOBAL),
        }
    }
}

fn request_size(size: usize) -> MemoryResult<usize> {
    checked_align(size)
        .filter(|&s| s <= MAX_OFFSET)
        .map(|s| s.max(WORD))
        .ok_or_else(|| exhausted(size))
}

fn zeroed(size: usize) -> MemoryResult<Box<[u8]>> {
    let mut block = Vec::new();
    block.try_reserve_exact(size).map_err(|_| exhausted(size))?;
    block.resize(size, 0);
    Ok(block.into_boxed_slice())
}

// passthrough blocks stand in for the global arena
fn exhausted(requested: usize) -> MemoryError {
    MemoryError::Exhausted {
        arena: ArenaId::GLOBAL,
        requested,
        available: 0,
    }
}
