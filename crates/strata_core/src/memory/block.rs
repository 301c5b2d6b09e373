//! # Block List
//!
//! The address-ordered list of blocks that partitions an arena's buffer.
//!
//! Block metadata lives in a side table keyed by header offset instead of
//! inside the buffer, but every block still reserves [`HEADER_SIZE`] bytes
//! in front of its payload so the layout arithmetic matches an intrusive
//! header:
//!
//! ```text
//! offset 0                 h + HEADER       next = h + HEADER + size
//! ┌────────┬───────────────┬────────┬──────────────────┬────────┬──
//! │ header │ payload       │ header │ payload          │ header │ ...
//! └────────┴───────────────┴────────┴──────────────────┴────────┴──
//! ```
//!
//! The list also keeps the arena's `used` figure: header bytes of every
//! block plus the payload bytes of every block that is not plain free.

use std::collections::BTreeMap;

use crate::id::ArenaId;
use crate::size::WORD;

/// Bytes reserved in front of every payload (size, owner, next).
pub const HEADER_SIZE: usize = 3 * WORD;

/// Ownership state of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Available to the linear scan and to merging.
    Free,
    /// Free, but held by a size-class pool or the hot-size cache.
    Retained,
    /// Payload belongs to the given arena.
    Owned(ArenaId),
}

impl BlockState {
    /// Returns true for plain free blocks.
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Metadata of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Payload size in bytes.
    pub size: usize,
    /// Who holds the payload.
    pub state: BlockState,
    /// Header offset of the following block, `None` for the terminal block.
    pub next: Option<usize>,
}

/// Converts a header offset to its payload offset.
#[inline]
#[must_use]
pub const fn payload_of(header: usize) -> usize {
    header + HEADER_SIZE
}

/// Converts a payload offset back to its header offset.
#[inline]
#[must_use]
pub const fn header_of(payload: usize) -> Option<usize> {
    payload.checked_sub(HEADER_SIZE)
}

/// The block list of a single arena.
#[derive(Debug)]
pub struct BlockList {
    blocks: BTreeMap<usize, Block>,
    capacity: usize,
    used: usize,
}

impl BlockList {
    /// Creates a list with one free block spanning `capacity` bytes.
    ///
    /// `capacity` must exceed [`HEADER_SIZE`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut list = Self {
            blocks: BTreeMap::new(),
            capacity,
            used: 0,
        };
        list.reset();
        list
    }

    /// Collapses the list back to a single free block.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.blocks.insert(
            0,
            Block {
                size: self.capacity - HEADER_SIZE,
                state: BlockState::Free,
                next: None,
            },
        );
        self.used = HEADER_SIZE;
    }

    /// Total bytes covered by the list.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Header bytes plus non-free payload bytes.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Number of blocks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; a list holds at least one block.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Looks up the block whose header is at `header`.
    #[inline]
    #[must_use]
    pub fn get(&self, header: usize) -> Option<&Block> {
        self.blocks.get(&header)
    }

    /// Walks the list in address order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.blocks.iter().map(|(&h, b)| (h, b))
    }

    /// Header offset of the first plain-free block with at least `size` bytes.
    #[must_use]
    pub fn first_fit(&self, size: usize) -> Option<usize> {
        self.iter()
            .find(|(_, b)| b.state.is_free() && b.size >= size)
            .map(|(h, _)| h)
    }

    /// Size of the largest plain-free block.
    #[must_use]
    pub fn largest_free(&self) -> usize {
        self.iter()
            .filter(|(_, b)| b.state.is_free())
            .map(|(_, b)| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Changes the state of a block, keeping `used` in step.
    pub fn set_state(&mut self, header: usize, state: BlockState) {
        debug_assert!(self.blocks.contains_key(&header), "set_state on missing block {header}");
        let Some(block) = self.blocks.get_mut(&header) else {
            return;
        };
        match (block.state.is_free(), state.is_free()) {
            (true, false) => self.used += block.size,
            (false, true) => self.used -= block.size,
            _ => {}
        }
        block.state = state;
    }

    /// Shrinks the block at `header` to `size` and turns the tail into a new
    /// free block, if the tail is larger than one header.
    ///
    /// Returns the header offset of the new free block.
    pub fn split(&mut self, header: usize, size: usize) -> Option<usize> {
        let block = *self.blocks.get(&header)?;
        if block.size <= size || block.size - size <= HEADER_SIZE {
            return None;
        }
        let tail = header + HEADER_SIZE + size;
        self.blocks.insert(
            tail,
            Block {
                size: block.size - size - HEADER_SIZE,
                state: BlockState::Free,
                next: block.next,
            },
        );
        let head = self.blocks.get_mut(&header)?;
        head.size = size;
        head.next = Some(tail);

        self.used += HEADER_SIZE;
        if !block.state.is_free() {
            self.used -= block.size - size;
        }
        self.check_link(header);
        self.check_link(tail);
        Some(tail)
    }

    /// Folds the plain-free block after `header` (header included) into it.
    pub fn absorb_next(&mut self, header: usize) -> bool {
        let Some(next_off) = self.blocks.get(&header).and_then(|b| b.next) else {
            return false;
        };
        let Some(next) = self.blocks.get(&next_off).copied() else {
            return false;
        };
        if !next.state.is_free() {
            return false;
        }
        self.blocks.remove(&next_off);
        let Some(block) = self.blocks.get_mut(&header) else {
            return false;
        };
        block.size += HEADER_SIZE + next.size;
        block.next = next.next;

        if block.state.is_free() {
            self.used -= HEADER_SIZE;
        } else {
            self.used += next.size;
        }
        self.check_link(header);
        true
    }

    /// Moves the boundary between `header` and its plain-free successor.
    ///
    /// A positive `delta` grows the block into its neighbour, a negative one
    /// hands bytes back to it. The neighbour must keep at least one word.
    pub fn shift_boundary(&mut self, header: usize, delta: isize) -> bool {
        let Some(block) = self.blocks.get(&header).copied() else {
            return false;
        };
        let Some(next_off) = block.next else {
            return false;
        };
        let Some(next) = self.blocks.get(&next_off).copied() else {
            return false;
        };
        if !next.state.is_free() {
            return false;
        }
        let magnitude = delta.unsigned_abs();
        let (new_size, new_next_off, new_next_size) = if delta >= 0 {
            if next.size < magnitude + WORD {
                return false;
            }
            (block.size + magnitude, next_off + magnitude, next.size - magnitude)
        } else {
            if block.size < magnitude {
                return false;
            }
            (block.size - magnitude, next_off - magnitude, next.size + magnitude)
        };

        self.blocks.remove(&next_off);
        self.blocks.insert(
            new_next_off,
            Block {
                size: new_next_size,
                state: BlockState::Free,
                next: next.next,
            },
        );
        if let Some(head) = self.blocks.get_mut(&header) {
            head.size = new_size;
            head.next = Some(new_next_off);
        }

        if !block.state.is_free() {
            if delta >= 0 {
                self.used += magnitude;
            } else {
                self.used -= magnitude;
            }
        }
        self.check_link(header);
        self.check_link(new_next_off);
        true
    }

    /// Merges every run of adjacent plain-free blocks.
    ///
    /// Returns the number of headers removed.
    pub fn merge_free_runs(&mut self) -> usize {
        let mut merged = 0;
        let mut cursor = Some(0);
        while let Some(header) = cursor {
            let Some(block) = self.blocks.get(&header) else {
                break;
            };
            if block.state.is_free() {
                while self.absorb_next(header) {
                    merged += 1;
                }
            }
            cursor = self.blocks.get(&header).and_then(|b| b.next);
        }
        merged
    }

    /// Verifies `next == header + HEADER_SIZE + size` for one block.
    #[inline]
    fn check_link(&self, header: usize) {
        if let Some(block) = self.blocks.get(&header) {
            debug_assert!(
                block.next.map_or(header + HEADER_SIZE + block.size == self.capacity, |n| {
                    n == header + HEADER_SIZE + block.size
                }),
                "block at {header} contains some amount of data other than the amount it says it does"
            );
        }
    }
}
