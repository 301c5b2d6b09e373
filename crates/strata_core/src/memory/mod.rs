//! # Memory Management
//!
//! Arenas, their block lists, and the caches that sit in front of them.
//!
//! ## Design Philosophy
//!
//! Each arena is carved out of the global arena once, at creation:
//! - Blocks partition the arena buffer with no gaps
//! - Freed blocks are retained by size when they are likely to be reused
//! - Exhaustion is reported, never papered over

pub mod arena;
pub mod block;
pub mod chain;
pub mod frequency;
pub mod heap;
pub mod pool;
pub mod stats;

pub use arena::{Arena, POISON_BYTE};
pub use block::{Block, BlockList, BlockState, HEADER_SIZE};
pub use chain::Chain;
pub use frequency::{FrequencyPolicy, FrequencyTracker};
pub use heap::HeapStore;
pub use pool::FreePools;
pub use stats::{ArenaStats, SizeBucket, UsageHistogram};
