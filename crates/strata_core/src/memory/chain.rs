//! # Allocator Chain
//!
//! Registry of live arenas indexed by id. Ids grow with creation order, so
//! iterating the registry visits arenas in the same order as the
//! creation-ordered chain.
//!
//! Every slot carries a generation that bumps each time an arena takes the
//! slot. A pointer whose generation no longer matches was issued by an
//! arena that has since been destroyed.

use std::sync::Arc;

use super::arena::Arena;
use crate::error::{MemoryError, MemoryResult};
use crate::id::{ArenaId, BlockPtr};

/// Live arenas in creation order.
#[derive(Debug)]
pub struct Chain {
    slots: Vec<Option<Arc<Arena>>>,
    generations: Vec<u16>,
}

impl Chain {
    /// Creates a chain holding only the global arena.
    #[must_use]
    pub fn new(global: Arc<Arena>) -> Self {
        debug_assert_eq!(global.id(), ArenaId::GLOBAL);
        Self {
            generations: vec![global.generation()],
            slots: vec![Some(global)],
        }
    }

    /// Looks up a live arena.
    #[must_use]
    pub fn get(&self, id: ArenaId) -> Option<Arc<Arena>> {
        self.slots.get(id.slot()).and_then(Clone::clone)
    }

    /// The last live arena in the chain.
    #[must_use]
    pub fn deepest(&self) -> ArenaId {
        self.slots
            .iter()
            .rev()
            .flatten()
            .map(|a| a.id())
            .next()
            .unwrap_or(ArenaId::GLOBAL)
    }

    /// Id and generation the next attached arena will receive.
    ///
    /// # Errors
    ///
    /// [`MemoryError::TooManyArenas`] once the id range is used up.
    pub fn next_slot(&self) -> MemoryResult<(ArenaId, u16)> {
        let id = self.deepest().deeper().ok_or(MemoryError::TooManyArenas)?;
        let generation = self
            .generations
            .get(id.slot())
            .map_or(0, |g| g.wrapping_add(1));
        Ok((id, generation))
    }

    /// Links an arena after the current deepest one.
    pub fn attach(&mut self, arena: Arc<Arena>) {
        let slot = arena.id().slot();
        debug_assert_eq!(arena.id(), self.deepest().deeper().unwrap_or(ArenaId::GLOBAL));
        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, None);
        }
        // generations outlive trailing slots popped by detach
        if self.generations.len() <= slot {
            self.generations.resize(slot + 1, 0);
        }
        self.generations[slot] = arena.generation();
        self.slots[slot] = Some(arena);
    }

    /// Unlinks an arena. Returns it if it was live.
    pub fn detach(&mut self, id: ArenaId) -> Option<Arc<Arena>> {
        let arena = self.slots.get_mut(id.slot())?.take();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        arena
    }

    /// Live arenas in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Arena>> {
        self.slots.iter().flatten()
    }

    /// Finds the arena that issued `ptr`, walking from `from`.
    ///
    /// Visits live arenas one at a time toward lower ids when the owner is
    /// shallower than `from` and toward higher ids otherwise. The walk stops
    /// at the first arena at or past the owner's depth; if that is not the
    /// issuing arena, the owner was destroyed and `None` is returned.
    #[must_use]
    pub fn route(&self, from: ArenaId, ptr: BlockPtr) -> Option<Arc<Arena>> {
        let owner = ptr.owner()?;
        if owner == from {
            return self.get(owner).filter(|a| a.issued(ptr));
        }
        let live = self.slots.iter().flatten();
        let mut hops = 0u32;
        let reached = if owner < from {
            live.rev()
                .skip_while(|a| a.id() >= from)
                .inspect(|_| hops += 1)
                .find(|a| a.id() <= owner)
        } else {
            live.skip_while(|a| a.id() <= from)
                .inspect(|_| hops += 1)
                .find(|a| a.id() >= owner)
        };
        let arena = reached.filter(|a| a.issued(ptr)).cloned();
        tracing::trace!(%from, %owner, hops, found = arena.is_some(), "forwarded along chain");
        arena
    }
}
