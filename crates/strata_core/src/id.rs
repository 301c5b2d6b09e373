//! # Identifiers
//!
//! Arena ids and the opaque pointer handle returned by every allocation.
//!
//! A [`BlockPtr`] plays the role of a raw payload pointer: it names the
//! owning arena, the generation of that arena's chain slot, and the payload
//! offset inside the arena's buffer.

use std::fmt;
use std::num::NonZeroU8;

/// Identifier of an arena, equal to its depth in the allocator chain.
///
/// The global arena is always `1`. A new arena takes the id of the deepest
/// live arena plus one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArenaId(NonZeroU8);

impl ArenaId {
    /// The always-present base arena.
    pub const GLOBAL: Self = Self(NonZeroU8::MIN);

    /// Creates an id from its raw value. Returns `None` for zero.
    #[inline]
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        match NonZeroU8::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0.get()
    }

    /// Index of this id's slot in the chain registry.
    #[inline]
    #[must_use]
    pub(crate) const fn slot(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Next deeper id, or `None` once the byte range is exhausted.
    #[inline]
    #[must_use]
    pub(crate) fn deeper(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const OFFSET_BITS: u32 = 40;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;
const ARENA_SHIFT: u32 = OFFSET_BITS;
const GENERATION_SHIFT: u32 = 48;

/// Largest offset a [`BlockPtr`] can carry. Saturates on 32-bit targets.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const MAX_OFFSET: usize = OFFSET_MASK as usize;

/// Handle to an allocated payload.
///
/// Layout:
/// - bits 0..40: payload offset inside the owner's buffer
/// - bits 40..48: owner arena id (0 for passthrough heap blocks)
/// - bits 48..64: generation of the owner's chain slot
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BlockPtr(u64);

impl BlockPtr {
    /// The null pointer.
    pub const NULL: Self = Self(0);

    /// Packs an arena-owned pointer.
    #[inline]
    #[must_use]
    pub(crate) fn new(arena: ArenaId, generation: u16, offset: usize) -> Self {
        debug_assert!(offset as u64 <= OFFSET_MASK);
        Self(
            (u64::from(generation) << GENERATION_SHIFT)
                | (u64::from(arena.get()) << ARENA_SHIFT)
                | (offset as u64 & OFFSET_MASK),
        )
    }

    /// Packs a passthrough heap pointer (no owner arena).
    #[inline]
    #[must_use]
    pub(crate) fn heap(key: usize) -> Self {
        debug_assert!(key != 0);
        Self(key as u64 & OFFSET_MASK)
    }

    /// Checks if this is the null pointer.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Owner arena, or `None` for null and passthrough pointers.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn owner(self) -> Option<ArenaId> {
        ArenaId::new((self.0 >> ARENA_SHIFT) as u8)
    }

    /// Generation of the owner's chain slot when the block was handed out.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    /// Payload offset inside the owner's buffer.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl Default for BlockPtr {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("BlockPtr(NULL)");
        }
        f.debug_struct("BlockPtr")
            .field("owner", &self.owner())
            .field("generation", &self.generation())
            .field("offset", &self.offset())
            .finish()
    }
}

impl fmt::Display for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_packing() {
        let id = ArenaId::new(7).unwrap();
        let ptr = BlockPtr::new(id, 513, 0x12_3456);
        assert_eq!(ptr.owner(), Some(id));
        assert_eq!(ptr.generation(), 513);
        assert_eq!(ptr.offset(), 0x12_3456);
        assert!(!ptr.is_null());
    }

    #[test]
    fn test_null_and_heap_pointers() {
        assert!(BlockPtr::NULL.is_null());
        assert_eq!(BlockPtr::default(), BlockPtr::NULL);
        let heap = BlockPtr::heap(64);
        assert!(!heap.is_null());
        assert_eq!(heap.owner(), None);
        assert_eq!(heap.offset(), 64);
    }

    #[test]
    fn test_arena_id_depth() {
        assert_eq!(ArenaId::GLOBAL.get(), 1);
        assert_eq!(ArenaId::GLOBAL.slot(), 0);
        assert_eq!(ArenaId::GLOBAL.deeper().map(ArenaId::get), Some(2));
        assert!(ArenaId::new(u8::MAX).unwrap().deeper().is_none());
        assert!(ArenaId::new(0).is_none());
    }
}
