//! # Allocator Interface
//!
//! The only surface other subsystems see. Anything that needs memory takes
//! an `&impl Allocator` (or `&dyn Allocator`) instead of reaching for a
//! process-wide heap.

use crate::error::{fatal, MemoryError, MemoryResult};
use crate::id::BlockPtr;

/// Allocate, resize, and free arena memory.
///
/// The `try_*` methods report every failure. The plain methods apply the
/// process policy:
/// - exhaustion is fatal
/// - reallocating a block whose owner is gone is fatal
/// - reallocating null allocates
/// - failed frees are logged and otherwise ignored
pub trait Allocator {
    /// Allocates `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Exhausted`] when the arena is full.
    fn try_allocate(&self, size: usize) -> MemoryResult<BlockPtr>;

    /// Resizes `ptr` to `size` bytes, possibly moving it.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NullPointer`], [`MemoryError::UnreachableOwner`],
    /// [`MemoryError::InvalidPointer`], or [`MemoryError::Exhausted`].
    fn try_reallocate(&self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr>;

    /// Frees `ptr`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NullPointer`], [`MemoryError::UnreachableOwner`], or
    /// [`MemoryError::InvalidPointer`].
    fn try_deallocate(&self, ptr: BlockPtr) -> MemoryResult<()>;

    /// Allocates `size` bytes or terminates the process.
    fn allocate(&self, size: usize) -> BlockPtr {
        self.try_allocate(size).unwrap_or_else(|e| fatal(&e))
    }

    /// Resizes `ptr` or terminates the process.
    fn reallocate(&self, ptr: BlockPtr, size: usize) -> BlockPtr {
        if ptr.is_null() {
            tracing::warn!(size, "reallocate called with a null pointer, allocating instead");
            return self.allocate(size);
        }
        self.try_reallocate(ptr, size).unwrap_or_else(|e| fatal(&e))
    }

    /// Frees `ptr`, logging anything that goes wrong.
    fn deallocate(&self, ptr: BlockPtr) {
        match self.try_deallocate(ptr) {
            Ok(()) => {}
            Err(MemoryError::NullPointer) => {
                tracing::warn!("deallocate called with a null pointer");
            }
            Err(err @ MemoryError::UnreachableOwner { .. }) => {
                tracing::warn!(error = %err, "leaking block");
            }
            Err(err) => {
                tracing::warn!(error = %err, %ptr, "deallocate failed");
            }
        }
    }
}
