//! # Arena Statistics
//!
//! Usage snapshots and the block-size histogram printed by `debug()`.

use std::fmt;

use crate::id::ArenaId;
use crate::size::format_size;

/// Number of distinct block sizes the histogram tracks individually.
pub const HISTOGRAM_BUCKETS: usize = 32;

/// Snapshot of one arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// Arena id.
    pub id: ArenaId,
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Header bytes plus payload bytes not plainly free.
    pub used: usize,
    /// Number of blocks.
    pub block_count: usize,
    /// `capacity - used`.
    pub free_bytes: usize,
    /// Largest plain-free payload.
    pub largest_free: usize,
    /// Blocks held by the size-class pools.
    pub pooled_blocks: usize,
    /// Payload bytes held by the size-class pools.
    pub pooled_bytes: usize,
    /// Blocks held by the hot-size cache.
    pub cached_blocks: usize,
    /// Payload bytes held by the hot-size cache.
    pub cached_bytes: usize,
    /// Allocations served from the hot-size cache.
    pub frequency_hits: u64,
    /// Allocations served from the size-class pools.
    pub pool_hits: u64,
    /// Allocations served by scanning the block list.
    pub scan_allocations: u64,
    /// Reallocations that grew without moving.
    pub in_place_growths: u64,
    /// Headers removed by merging free blocks.
    pub merges: u64,
}

impl ArenaStats {
    /// Used fraction of capacity, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_percent(&self) -> f32 {
        (self.used as f64 / self.capacity as f64 * 100.0) as f32
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Allocator {}: {} / {} ({} blocks), {:.2}%",
            self.id,
            format_size(self.used),
            format_size(self.capacity),
            self.block_count,
            self.usage_percent()
        )
    }
}

/// Used and unused block counts for one exact size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeBucket {
    /// Payload size.
    pub size: usize,
    /// Blocks of this size in use (owned or retained).
    pub used: usize,
    /// Plain-free blocks of this size.
    pub unused: usize,
}

/// Block counts grouped by exact payload size.
///
/// The first [`HISTOGRAM_BUCKETS`] distinct sizes seen get their own bucket;
/// later sizes are lumped into the `other_*` counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageHistogram {
    /// Per-size buckets in first-seen order.
    pub buckets: Vec<SizeBucket>,
    /// In-use blocks of sizes without a bucket.
    pub other_used: usize,
    /// Free blocks of sizes without a bucket.
    pub other_unused: usize,
}

impl UsageHistogram {
    /// Counts one block.
    pub fn record(&mut self, size: usize, used: bool) {
        let bucket = match self.buckets.iter().position(|b| b.size == size) {
            Some(i) => Some(&mut self.buckets[i]),
            None if self.buckets.len() < HISTOGRAM_BUCKETS => {
                self.buckets.push(SizeBucket {
                    size,
                    ..SizeBucket::default()
                });
                self.buckets.last_mut()
            }
            None => None,
        };
        match (bucket, used) {
            (Some(b), true) => b.used += 1,
            (Some(b), false) => b.unused += 1,
            (None, true) => self.other_used += 1,
            (None, false) => self.other_unused += 1,
        }
    }

    /// Logs the histogram, indented by `depth` levels.
    pub fn log(&self, depth: usize) {
        let indent = "\t".repeat(depth + 1);
        for bucket in &self.buckets {
            tracing::info!(
                "{indent}Blocks of size {}: used: {}, unused: {}",
                format_size(bucket.size),
                bucket.used,
                bucket.unused
            );
        }
        if self.other_used > 0 || self.other_unused > 0 {
            tracing::info!(
                "{indent}Blocks of size not shown above: used: {}, unused: {}",
                self.other_used,
                self.other_unused
            );
        }
    }
}
