//! # Allocator Context Stack
//!
//! The stack of "current arena" frames. Pushing a frame redirects every
//! allocation made through the [`MemorySystem`] into that arena until the
//! frame is popped.
//!
//! The manager lock is taken by the push and held by the returned
//! [`ScopedAllocator`] until it pops, so context switches are serialized
//! process-wide for the whole scope. The lock is re-entrant: the owning
//! thread may allocate and nest further scopes freely.

use std::cell::RefCell;

use parking_lot::ReentrantMutexGuard;

use crate::allocator::Allocator;
use crate::error::{fatal, MemoryError, MemoryResult};
use crate::id::{ArenaId, BlockPtr};
use crate::size::WORD;
use crate::system::MemorySystem;

/// Bytes each frame reserves in the global arena (arena, next, last).
pub const FRAME_SIZE: usize = 3 * WORD;

/// One entry of the context stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Arena allocations are redirected to.
    pub arena: ArenaId,
    /// Generation of that arena's chain slot at push time.
    pub generation: u16,
    /// The frame's own reservation in the global arena.
    pub reservation: BlockPtr,
}

/// Frames from the bottom (global) to the top (current).
#[derive(Debug)]
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    /// Creates a stack holding only the base frame.
    pub fn new(base: Frame) -> Self {
        Self { frames: vec![base] }
    }

    /// The current frame.
    pub fn top(&self) -> Frame {
        self.frames[self.frames.len() - 1]
    }

    /// Number of frames, the base frame included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Removes the top frame. The base frame cannot be removed.
    pub fn pop(&mut self) -> MemoryResult<Frame> {
        if self.frames.len() <= 1 {
            return Err(MemoryError::ContextUnderflow);
        }
        self.frames.pop().ok_or(MemoryError::ContextUnderflow)
    }

    /// Removes `frame` wherever it sits above the base frame.
    pub fn remove(&mut self, frame: Frame) -> MemoryResult<Frame> {
        let index = self
            .frames
            .iter()
            .rposition(|f| *f == frame)
            .filter(|&i| i > 0)
            .ok_or(MemoryError::ContextUnderflow)?;
        Ok(self.frames.remove(index))
    }
}

/// A pushed allocator context. Dropping it pops the context.
///
/// Created by [`MemorySystem::push_current`] and
/// [`MemorySystem::push_current_id`]. While it lives, allocations through
/// the system on this thread land in [`ScopedAllocator::arena`], and other
/// threads wait at the manager lock.
///
/// # Example
///
/// ```rust,ignore
/// let level = system.create_arena(mb(4))?;
/// {
///     let _scope = system.push_current(&level);
///     let ptr = system.allocate(256); // lands in `level`
/// }
/// assert_eq!(system.current(), system.global());
/// ```
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ScopedAllocator<'a> {
    system: &'a MemorySystem,
    frame: Frame,
    depth: usize,
    guard: Option<ReentrantMutexGuard<'a, RefCell<ContextStack>>>,
}

impl<'a> ScopedAllocator<'a> {
    pub(crate) fn enter(system: &'a MemorySystem, arena: ArenaId, generation: u16) -> Self {
        let guard = system.inner.context.lock();
        let reservation = system
            .inner
            .global
            .allocate(FRAME_SIZE)
            .unwrap_or_else(|e| fatal(&e));
        let frame = Frame {
            arena,
            generation,
            reservation,
        };
        let depth = {
            let mut stack = guard.borrow_mut();
            stack.push(frame);
            stack.depth()
        };
        tracing::trace!(%arena, depth, "pushed allocator context");
        Self {
            system,
            frame,
            depth,
            guard: Some(guard),
        }
    }

    /// The arena this context redirects to.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> ArenaId {
        self.frame.arena
    }

    /// Pops the context now and returns its arena.
    ///
    /// A guard dropped while newer contexts are still pushed removes only
    /// its own frame and logs a warning.
    pub fn pop(mut self) -> ArenaId {
        self.exit()
    }

    fn exit(&mut self) -> ArenaId {
        let Some(guard) = self.guard.take() else {
            return self.frame.arena;
        };
        let popped = {
            let mut stack = guard.borrow_mut();
            if stack.top() == self.frame {
                stack.pop()
            } else {
                tracing::warn!(
                    expected = self.depth,
                    actual = stack.depth(),
                    "allocator contexts popped out of order"
                );
                stack.remove(self.frame)
            }
        };
        let arena = match popped {
            Ok(frame) => {
                if let Err(err) = self.system.inner.global.deallocate(frame.reservation) {
                    tracing::warn!(error = %err, "failed to release context frame");
                }
                frame.arena
            }
            Err(err) => {
                tracing::warn!(error = %err, "allocator context already gone");
                self.frame.arena
            }
        };
        tracing::trace!(%arena, depth = self.depth, "popped allocator context");
        drop(guard);
        arena
    }
}

impl Drop for ScopedAllocator<'_> {
    fn drop(&mut self) {
        self.exit();
    }
}

impl Allocator for ScopedAllocator<'_> {
    fn try_allocate(&self, size: usize) -> MemoryResult<BlockPtr> {
        let origin = self.system.resolve_frame(self.frame);
        self.system.allocate_in(&origin, size)
    }

    fn try_reallocate(&self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr> {
        let origin = self.system.resolve_frame(self.frame);
        self.system.reallocate_in(&origin, ptr, size)
    }

    fn try_deallocate(&self, ptr: BlockPtr) -> MemoryResult<()> {
        let origin = self.system.resolve_frame(self.frame);
        self.system.deallocate_in(&origin, ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(raw: u8) -> Frame {
        Frame {
            arena: ArenaId::new(raw).unwrap(),
            generation: 0,
            reservation: BlockPtr::NULL,
        }
    }

    #[test]
    fn test_stack_keeps_base_frame() {
        let mut stack = ContextStack::new(frame(1));
        assert!(stack.pop().is_err());
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().arena, ArenaId::GLOBAL);
    }

    #[test]
    fn test_stack_removes_buried_frame() {
        let mut stack = ContextStack::new(frame(1));
        stack.push(frame(2));
        stack.push(frame(3));
        assert_eq!(stack.remove(frame(2)).unwrap().arena.get(), 2);
        assert_eq!(stack.top().arena.get(), 3);
        assert_eq!(stack.depth(), 2);
        assert!(stack.remove(frame(2)).is_err());
        assert!(stack.remove(frame(1)).is_err());
    }

    #[test]
    fn test_stack_is_lifo() {
        let mut stack = ContextStack::new(frame(1));
        stack.push(frame(2));
        stack.push(frame(3));
        assert_eq!(stack.pop().unwrap().arena.get(), 3);
        assert_eq!(stack.top().arena.get(), 2);
        assert_eq!(stack.pop().unwrap().arena.get(), 2);
        assert_eq!(stack.depth(), 1);
    }
}
