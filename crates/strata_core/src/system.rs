//! # Memory System
//!
//! The explicitly constructed owner of the global arena, the allocator
//! chain, and the context stack. The process entry point builds one and
//! passes it (or an [`ArenaHandle`]) to everything that allocates.
//!
//! ## Lock Order
//!
//! context stack, then chain, then a single arena. No path takes two arena
//! locks at once.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::allocator::Allocator;
use crate::config::MemoryConfig;
use crate::context::{ContextStack, Frame, ScopedAllocator, FRAME_SIZE};
use crate::error::{MemoryError, MemoryResult};
use crate::handle::ArenaHandle;
use crate::id::{ArenaId, BlockPtr};
use crate::memory::arena::pool_entries;
use crate::memory::pool::ENTRY_SIZE;
use crate::memory::{Arena, ArenaStats, Chain, HeapStore, HEADER_SIZE};
use crate::size::{checked_align, format_size};

/// Shared state behind every clone of a [`MemorySystem`].
#[derive(Debug)]
pub(crate) struct SystemInner {
    pub(crate) config: MemoryConfig,
    pub(crate) global: Arc<Arena>,
    pub(crate) chain: RwLock<Chain>,
    pub(crate) context: ReentrantMutex<RefCell<ContextStack>>,
    pub(crate) heap: Mutex<HeapStore>,
}

/// The memory system: global arena, allocator chain, and context stack.
///
/// Cloning is cheap and yields another handle to the same system.
///
/// # Thread Safety
///
/// Every method may be called from any thread. While a
/// [`ScopedAllocator`] is alive, other threads block on their next
/// allocation through the system until it pops.
#[derive(Clone, Debug)]
pub struct MemorySystem {
    pub(crate) inner: Arc<SystemInner>,
}

impl MemorySystem {
    /// Builds a system from `config`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] if the budget cannot hold a block.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let global = Arc::new(Arena::new(
            ArenaId::GLOBAL,
            0,
            config.budget_bytes,
            &config,
        ));
        let base = Frame {
            arena: ArenaId::GLOBAL,
            generation: global.generation(),
            reservation: global.allocate(FRAME_SIZE)?,
        };
        tracing::info!(
            budget = %format_size(config.budget_bytes),
            passthrough = config.passthrough,
            "memory system online"
        );

        Ok(Self {
            inner: Arc::new(SystemInner {
                chain: RwLock::new(Chain::new(Arc::clone(&global))),
                global,
                context: ReentrantMutex::new(RefCell::new(ContextStack::new(base))),
                heap: Mutex::new(HeapStore::new()),
                config,
            }),
        })
    }

    /// Loads the persisted budget at `path` (creating it if missing) and
    /// builds a system with default tuning.
    ///
    /// # Errors
    ///
    /// Anything [`MemoryConfig::load_or_create`] reports.
    pub fn bootstrap(path: &Path) -> MemoryResult<Self> {
        Self::new(MemoryConfig::load_or_create(path)?)
    }

    /// The configuration this system was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// The always-present base arena.
    #[inline]
    #[must_use]
    pub const fn global(&self) -> ArenaId {
        ArenaId::GLOBAL
    }

    /// The arena on top of the context stack.
    #[must_use]
    pub fn current(&self) -> ArenaId {
        self.inner.context.lock().borrow().top().arena
    }

    /// Number of frames on the context stack, the base frame included.
    #[must_use]
    pub fn context_depth(&self) -> usize {
        self.inner.context.lock().borrow().depth()
    }

    /// Looks up a live arena.
    #[must_use]
    pub fn arena(&self, id: ArenaId) -> Option<Arc<Arena>> {
        self.inner.chain.read().get(id)
    }

    /// Ids of live arenas in chain order.
    #[must_use]
    pub fn arenas(&self) -> Vec<ArenaId> {
        self.inner.chain.read().iter().map(|a| a.id()).collect()
    }

    /// Usage snapshot of a live arena.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UnknownArena`] if no live arena has `id`.
    pub fn stats(&self, id: ArenaId) -> MemoryResult<ArenaStats> {
        self.arena(id)
            .map(|a| a.stats())
            .ok_or(MemoryError::UnknownArena(id))
    }

    /// Creates an arena of `bytes` bytes, carved out of the global arena and
    /// linked after the deepest arena in the chain.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidConfig`] if `bytes` cannot hold a block
    /// - [`MemoryError::TooManyArenas`] if the chain is full
    /// - [`MemoryError::Exhausted`] if the global arena cannot back it
    pub fn create_arena(&self, bytes: usize) -> MemoryResult<ArenaHandle> {
        let Some(capacity) = checked_align(bytes) else {
            return Err(MemoryError::Exhausted {
                arena: ArenaId::GLOBAL,
                requested: bytes,
                available: self.inner.global.capacity() - self.inner.global.used(),
            });
        };
        if capacity <= 2 * HEADER_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "arena of {} cannot hold a single block",
                format_size(capacity)
            )));
        }
        let config = &self.inner.config;
        let global = &self.inner.global;

        let mut chain = self.inner.chain.write();
        let (id, generation) = chain.next_slot()?;
        let buffer = global.allocate(capacity)?;
        let entries = pool_entries(capacity, config);
        let pool_buffer = if entries == 0 {
            BlockPtr::NULL
        } else {
            match global.allocate(entries * ENTRY_SIZE) {
                Ok(ptr) => ptr,
                Err(err) => {
                    if let Err(undo) = global.deallocate(buffer) {
                        tracing::warn!(error = %undo, "failed to return arena buffer");
                    }
                    return Err(err);
                }
            }
        };

        let arena = Arc::new(Arena::new(id, generation, capacity, config));
        let parent = chain.deepest();
        chain.attach(Arc::clone(&arena));
        drop(chain);

        tracing::debug!(
            arena = %id,
            parent = %parent,
            capacity = %format_size(capacity),
            "allocator created"
        );
        Ok(ArenaHandle::new(self.clone(), arena, buffer, pool_buffer))
    }

    /// Makes `arena` current until the returned guard is dropped or popped.
    ///
    /// Holds the context lock for the whole scope.
    pub fn push_current(&self, arena: &ArenaHandle) -> ScopedAllocator<'_> {
        ScopedAllocator::enter(self, arena.id(), arena.arena().generation())
    }

    /// Makes the arena with `id` current. An unknown or destroyed id pushes
    /// the global arena instead and logs a warning.
    pub fn push_current_id(&self, id: ArenaId) -> ScopedAllocator<'_> {
        match self.arena(id) {
            Some(arena) => ScopedAllocator::enter(self, id, arena.generation()),
            None => {
                tracing::warn!(arena = %id, "allocator does not exist, pushing global");
                ScopedAllocator::enter(self, ArenaId::GLOBAL, self.inner.global.generation())
            }
        }
    }

    /// Payload size of the block behind `ptr`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NullPointer`], [`MemoryError::UnreachableOwner`], or
    /// [`MemoryError::InvalidPointer`].
    pub fn size_of(&self, ptr: BlockPtr) -> MemoryResult<usize> {
        self.with_bytes(ptr, <[u8]>::len)
    }

    /// Runs `f` over the payload of `ptr`.
    ///
    /// # Errors
    ///
    /// As for [`MemorySystem::size_of`].
    pub fn with_bytes<R>(&self, ptr: BlockPtr, f: impl FnOnce(&[u8]) -> R) -> MemoryResult<R> {
        if self.is_heap(ptr) {
            let heap = self.inner.heap.lock();
            return heap.lookup(ptr).map(f);
        }
        self.owner(ptr)?.with_payload(ptr, f)
    }

    /// Runs `f` over the payload of `ptr`, mutably.
    ///
    /// # Errors
    ///
    /// As for [`MemorySystem::size_of`].
    pub fn with_bytes_mut<R>(
        &self,
        ptr: BlockPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> MemoryResult<R> {
        if self.is_heap(ptr) {
            let mut heap = self.inner.heap.lock();
            return heap.lookup_mut(ptr).map(|block| f(&mut block[..]));
        }
        self.owner(ptr)?.with_payload_mut(ptr, f)
    }

    /// Copies `bytes` into the payload of `ptr` at `offset`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfBounds`] if the write runs past the payload, or
    /// anything [`MemorySystem::size_of`] reports.
    pub fn write(&self, ptr: BlockPtr, offset: usize, bytes: &[u8]) -> MemoryResult<()> {
        self.with_bytes_mut(ptr, |payload| {
            let range = checked_range(ptr, offset, bytes.len(), payload.len())?;
            payload[range].copy_from_slice(bytes);
            Ok(())
        })?
    }

    /// Copies from the payload of `ptr` at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// As for [`MemorySystem::write`].
    pub fn read(&self, ptr: BlockPtr, offset: usize, out: &mut [u8]) -> MemoryResult<()> {
        self.with_bytes(ptr, |payload| {
            let range = checked_range(ptr, offset, out.len(), payload.len())?;
            out.copy_from_slice(&payload[range]);
            Ok(())
        })?
    }

    /// Writes a plain-old-data value at `offset`.
    ///
    /// # Errors
    ///
    /// As for [`MemorySystem::write`].
    pub fn write_pod<T: Pod>(&self, ptr: BlockPtr, offset: usize, value: &T) -> MemoryResult<()> {
        self.write(ptr, offset, bytemuck::bytes_of(value))
    }

    /// Reads a plain-old-data value at `offset`. No alignment is required.
    ///
    /// # Errors
    ///
    /// As for [`MemorySystem::write`].
    pub fn read_pod<T: Pod>(&self, ptr: BlockPtr, offset: usize) -> MemoryResult<T> {
        self.with_bytes(ptr, |payload| {
            let range = checked_range(ptr, offset, std::mem::size_of::<T>(), payload.len())?;
            Ok(bytemuck::pod_read_unaligned(&payload[range]))
        })?
    }

    /// Logs every arena's usage histogram, indented by depth, and writes
    /// each raw buffer to `dir/mem_s<id>.dat`.
    ///
    /// Returns the files written. An arena whose buffer cannot be written is
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Io`] if `dir` cannot be created.
    pub fn debug(&self, dir: &Path) -> MemoryResult<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let arenas: Vec<Arc<Arena>> = self.inner.chain.read().iter().cloned().collect();

        tracing::info!("memory usage:");
        if self.inner.config.passthrough {
            let heap = self.inner.heap.lock();
            tracing::info!(
                "passthrough heap: {} blocks, {}",
                heap.len(),
                format_size(heap.bytes())
            );
        }

        let mut written = Vec::with_capacity(arenas.len());
        for (depth, arena) in arenas.iter().enumerate() {
            let histogram = arena.histogram();
            let stats = arena.stats();
            let indent = "\t".repeat(depth);
            tracing::info!("{indent}{stats}");
            histogram.log(depth);

            let path = dir.join(format!("mem_s{}.dat", arena.id()));
            match arena.dump(&path) {
                Ok(()) => written.push(path),
                Err(err) => {
                    tracing::warn!(arena = %arena.id(), error = %err, "failed to save memory");
                }
            }
        }
        Ok(written)
    }

    /// Resolves a context frame to its arena. Frames whose arena has been
    /// destroyed resolve to the global arena.
    pub(crate) fn resolve_frame(&self, frame: Frame) -> Arc<Arena> {
        let found = self
            .arena(frame.arena)
            .filter(|a| a.generation() == frame.generation);
        found.unwrap_or_else(|| {
            tracing::warn!(
                arena = %frame.arena,
                "current allocator was destroyed, falling back to global"
            );
            Arc::clone(&self.inner.global)
        })
    }

    pub(crate) fn allocate_in(&self, origin: &Arena, size: usize) -> MemoryResult<BlockPtr> {
        if self.inner.config.passthrough {
            return self.inner.heap.lock().allocate(size);
        }
        origin.allocate(size)
    }

    pub(crate) fn reallocate_in(
        &self,
        origin: &Arena,
        ptr: BlockPtr,
        size: usize,
    ) -> MemoryResult<BlockPtr> {
        if self.is_heap(ptr) {
            return self.inner.heap.lock().reallocate(ptr, size);
        }
        if origin.issued(ptr) {
            return origin.reallocate(ptr, size);
        }
        self.forward(origin, ptr)?.reallocate(ptr, size)
    }

    pub(crate) fn deallocate_in(&self, origin: &Arena, ptr: BlockPtr) -> MemoryResult<()> {
        if self.is_heap(ptr) {
            return self.inner.heap.lock().deallocate(ptr);
        }
        if origin.issued(ptr) {
            return origin.deallocate(ptr);
        }
        self.forward(origin, ptr)?.deallocate(ptr)
    }

    /// Walks the chain from `origin` to the arena that issued `ptr`.
    fn forward(&self, origin: &Arena, ptr: BlockPtr) -> MemoryResult<Arc<Arena>> {
        let owner = ptr.owner().ok_or(MemoryError::NullPointer)?;
        self.inner
            .chain
            .read()
            .route(origin.id(), ptr)
            .ok_or(MemoryError::UnreachableOwner { ptr, owner })
    }

    /// The live arena that issued `ptr`, looked up directly.
    fn owner(&self, ptr: BlockPtr) -> MemoryResult<Arc<Arena>> {
        let owner = ptr.owner().ok_or(MemoryError::NullPointer)?;
        self.arena(owner)
            .filter(|a| a.issued(ptr))
            .ok_or(MemoryError::UnreachableOwner { ptr, owner })
    }

    #[inline]
    fn is_heap(&self, ptr: BlockPtr) -> bool {
        self.inner.config.passthrough && !ptr.is_null() && ptr.owner().is_none()
    }

    fn current_arena(&self) -> Arc<Arena> {
        let frame = self.inner.context.lock().borrow().top();
        self.resolve_frame(frame)
    }
}

impl Allocator for MemorySystem {
    fn try_allocate(&self, size: usize) -> MemoryResult<BlockPtr> {
        self.allocate_in(&self.current_arena(), size)
    }

    fn try_reallocate(&self, ptr: BlockPtr, size: usize) -> MemoryResult<BlockPtr> {
        self.reallocate_in(&self.current_arena(), ptr, size)
    }

    fn try_deallocate(&self, ptr: BlockPtr) -> MemoryResult<()> {
        self.deallocate_in(&self.current_arena(), ptr)
    }
}

fn checked_range(
    ptr: BlockPtr,
    offset: usize,
    len: usize,
    size: usize,
) -> MemoryResult<std::ops::Range<usize>> {
    offset
        .checked_add(len)
        .filter(|&end| end <= size)
        .map(|end| offset..end)
        .ok_or(MemoryError::OutOfBounds {
            ptr,
            offset,
            len,
            size,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::kb;

    fn system() -> MemorySystem {
        MemorySystem::new(MemoryConfig::with_budget(kb(256))).unwrap()
    }

    #[test]
    fn test_base_frame_is_reserved() {
        let system = system();
        assert_eq!(system.current(), ArenaId::GLOBAL);
        assert_eq!(system.context_depth(), 1);
        assert_eq!(
            system.stats(ArenaId::GLOBAL).unwrap().used,
            2 * HEADER_SIZE + FRAME_SIZE
        );
    }

    #[test]
    fn test_rejects_tiny_budget() {
        assert!(matches!(
            MemorySystem::new(MemoryConfig::with_budget(HEADER_SIZE)),
            Err(MemoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_create_arena_reserves_global_space() {
        let system = system();
        let before = system.stats(ArenaId::GLOBAL).unwrap().used;
        let level = system.create_arena(kb(16)).unwrap();
        assert_eq!(level.id().get(), 2);
        assert!(system.stats(ArenaId::GLOBAL).unwrap().used >= before + kb(16));
        assert_eq!(system.arenas().len(), 2);
    }

    #[test]
    fn test_tiny_arena_is_rejected() {
        let system = system();
        assert!(system.create_arena(HEADER_SIZE).is_err());
    }

    #[test]
    fn test_unaddressable_sizes_are_exhaustion() {
        let system = system();
        let used = system.stats(ArenaId::GLOBAL).unwrap().used;
        assert!(matches!(
            system.try_allocate(usize::MAX - 2),
            Err(MemoryError::Exhausted { .. })
        ));
        assert!(matches!(
            system.create_arena(usize::MAX),
            Err(MemoryError::Exhausted { .. })
        ));
        assert_eq!(system.stats(ArenaId::GLOBAL).unwrap().used, used);
        assert_eq!(system.arenas().len(), 1);
    }

    #[test]
    fn test_read_write_bounds() {
        let system = system();
        let ptr = system.try_allocate(16).unwrap();
        system.write(ptr, 8, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        system.read(ptr, 8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(matches!(
            system.write(ptr, 14, &[0; 4]),
            Err(MemoryError::OutOfBounds { size: 16, .. })
        ));
        assert!(system.read(ptr, usize::MAX, &mut out).is_err());
    }

    #[test]
    fn test_pod_round_trip_unaligned() {
        let system = system();
        let ptr = system.try_allocate(32).unwrap();
        system.write_pod(ptr, 3, &0xDEAD_BEEF_u32).unwrap();
        assert_eq!(system.read_pod::<u32>(ptr, 3).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_push_unknown_id_falls_back_to_global() {
        let system = system();
        let scope = system.push_current_id(ArenaId::new(9).unwrap());
        assert_eq!(scope.arena(), ArenaId::GLOBAL);
        assert_eq!(system.current(), ArenaId::GLOBAL);
        assert_eq!(system.context_depth(), 2);
        assert_eq!(scope.pop(), ArenaId::GLOBAL);
        assert_eq!(system.context_depth(), 1);
    }

    #[test]
    fn test_null_pointer_errors() {
        let system = system();
        assert!(matches!(
            system.try_deallocate(BlockPtr::NULL),
            Err(MemoryError::NullPointer)
        ));
        assert!(matches!(
            system.size_of(BlockPtr::NULL),
            Err(MemoryError::NullPointer)
        ));
    }

    #[test]
    fn test_passthrough_never_exhausts() {
        let config = MemoryConfig::with_budget(kb(1)).with_passthrough(true);
        let system = MemorySystem::new(config).unwrap();
        let ptr = system.try_allocate(kb(64)).unwrap();
        assert!(ptr.owner().is_none());
        assert_eq!(system.size_of(ptr).unwrap(), kb(64));
        let ptr = system.try_reallocate(ptr, kb(128)).unwrap();
        assert_eq!(system.size_of(ptr).unwrap(), kb(128));
        system.try_deallocate(ptr).unwrap();
    }
}
