//! # Size-Class Free Pools
//!
//! Bucketed lists of free blocks, used to skip the linear block scan.
//!
//! Entries come from a fixed supply allocated when the arena is built:
//! a slot array plus a free list of slot indices, so inserting and
//! removing entries never touches the heap.

use crate::size::WORD;

/// Number of size-class buckets.
pub const NUM_BUCKETS: usize = 16;

/// Inclusive upper bound of each bucket's block-size range.
///
/// Bucket `i` holds blocks with `BUCKET_LIMITS[i - 1] < size <= BUCKET_LIMITS[i]`.
const BUCKET_LIMITS: [usize; NUM_BUCKETS] = [
    16, 32, 48, 64, 96, 128, 192, 256, // small steps
    384, 512, 1024, 2048, 4096, 8192, 16384, // wider steps
    usize::MAX, // everything larger
];

/// Bytes one pool entry occupies in the supplier arena (block, size, next).
pub const ENTRY_SIZE: usize = 3 * WORD;

/// Bucket index for a block or request size.
#[must_use]
pub fn bucket_index(size: usize) -> usize {
    BUCKET_LIMITS
        .iter()
        .position(|&limit| size <= limit)
        .unwrap_or(NUM_BUCKETS - 1)
}

/// Number of pool entries to provision for an arena of `capacity` bytes.
#[must_use]
pub fn entries_for(capacity: usize, pool_fraction: usize) -> usize {
    (capacity / pool_fraction.max(1) / 256).clamp(16, 4096)
}

#[derive(Clone, Copy, Debug)]
struct PoolEntry {
    /// Header offset of the pooled block.
    block: usize,
    /// Payload size of the pooled block.
    size: usize,
    /// Next entry in the same bucket.
    next: Option<usize>,
}

/// Size-class free pools of one arena.
///
/// # Thread Safety
///
/// Not thread-safe on its own; lives inside the arena's lock.
#[derive(Debug)]
pub struct FreePools {
    /// Entry slots.
    entries: Box<[Option<PoolEntry>]>,
    /// Indices of unused slots.
    free_slots: Vec<usize>,
    /// First entry of each bucket.
    heads: [Option<usize>; NUM_BUCKETS],
    /// Payload bytes currently held.
    bytes: usize,
    /// Maximum payload bytes held at once.
    budget: usize,
}

impl FreePools {
    /// Creates pools with `entry_capacity` entries and a byte budget.
    #[must_use]
    pub fn new(entry_capacity: usize, budget: usize) -> Self {
        Self {
            entries: vec![None; entry_capacity].into_boxed_slice(),
            free_slots: (0..entry_capacity).rev().collect(),
            heads: [None; NUM_BUCKETS],
            bytes: 0,
            budget,
        }
    }

    /// Number of entry slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of pooled blocks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - self.free_slots.len()
    }

    /// Returns true if no block is pooled.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes currently pooled.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Pools a free block. Fails when out of entries or over budget.
    pub fn insert(&mut self, block: usize, size: usize) -> bool {
        if self.bytes + size > self.budget {
            return false;
        }
        let Some(slot) = self.free_slots.pop() else {
            return false;
        };
        let bucket = bucket_index(size);
        self.entries[slot] = Some(PoolEntry {
            block,
            size,
            next: self.heads[bucket],
        });
        self.heads[bucket] = Some(slot);
        self.bytes += size;
        true
    }

    /// Removes a pooled block that can hold `size` bytes.
    ///
    /// Only the bucket whose range contains `size` is searched.
    /// Returns the block's header offset and payload size.
    pub fn take(&mut self, size: usize) -> Option<(usize, usize)> {
        let bucket = bucket_index(size);
        let mut prev: Option<usize> = None;
        let mut cursor = self.heads[bucket];
        while let Some(slot) = cursor {
            let entry = self.entries[slot]?;
            if entry.size >= size {
                match prev {
                    Some(p) => {
                        if let Some(prev_entry) = self.entries[p].as_mut() {
                            prev_entry.next = entry.next;
                        }
                    }
                    None => self.heads[bucket] = entry.next,
                }
                self.entries[slot] = None;
                self.free_slots.push(slot);
                self.bytes -= entry.size;
                return Some((entry.block, entry.size));
            }
            prev = Some(slot);
            cursor = entry.next;
        }
        None
    }

    /// Empties every bucket, returning the header offsets that were pooled.
    pub fn drain(&mut self) -> Vec<usize> {
        let blocks = self
            .entries
            .iter()
            .filter_map(|e| e.map(|e| e.block))
            .collect();
        self.clear();
        blocks
    }

    /// Forgets every pooled block without reporting them.
    pub fn clear(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
        let capacity = self.entries.len();
        self.free_slots.clear();
        self.free_slots.extend((0..capacity).rev());
        self.heads = [None; NUM_BUCKETS];
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index_ranges() {
        assert_eq!(bucket_index(8), 0);
        assert_eq!(bucket_index(16), 0);
        assert_eq!(bucket_index(17), 1);
        assert_eq!(bucket_index(100), 5);
        assert_eq!(bucket_index(16384), 14);
        assert_eq!(bucket_index(16385), NUM_BUCKETS - 1);
    }

    #[test]
    fn test_bucket_limits_ascending() {
        for i in 1..NUM_BUCKETS {
            assert!(BUCKET_LIMITS[i] > BUCKET_LIMITS[i - 1]);
        }
    }

    #[test]
    fn test_insert_take_same_bucket() {
        let mut pools = FreePools::new(4, 1024);
        assert!(pools.insert(100, 56));
        assert!(pools.insert(200, 64));
        assert_eq!(pools.len(), 2);

        // 60 lives in the 48..=64 bucket; only the 64-byte block fits
        assert_eq!(pools.take(60), Some((200, 64)));
        assert_eq!(pools.take(60), None);
        assert_eq!(pools.take(56), Some((100, 56)));
        assert!(pools.is_empty());
        assert_eq!(pools.bytes(), 0);
    }

    #[test]
    fn test_budget_and_entry_limits() {
        let mut pools = FreePools::new(2, 100);
        assert!(pools.insert(0, 64));
        assert!(!pools.insert(1, 64), "over byte budget");
        assert!(pools.insert(2, 8));
        assert!(!pools.insert(3, 8), "out of entries");
    }

    #[test]
    fn test_drain_returns_all_blocks() {
        let mut pools = FreePools::new(8, 4096);
        for (i, size) in [16, 128, 2048].into_iter().enumerate() {
            assert!(pools.insert(i * 1000, size));
        }
        let mut drained = pools.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1000, 2000]);
        assert!(pools.is_empty());
        assert_eq!(pools.capacity(), 8);
    }

    #[test]
    fn test_entries_for_clamps() {
        assert_eq!(entries_for(1024, 4), 16);
        assert_eq!(entries_for(usize::MAX / 2, 4), 4096);
    }
}
