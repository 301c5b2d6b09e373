//! # STRATA Core
//!
//! Tiered arena memory system for long-running engines:
//! - One global arena sized from a persisted budget
//! - Child arenas carved out of it, linked in creation order
//! - Scoped redirection of allocation through a context stack
//!
//! ## Architecture Rules
//!
//! 1. **Blocks partition the arena** - headers and payloads cover every byte
//! 2. **Exhaustion is fatal** - the process-facing calls never return null
//! 3. **Frees find their owner** - foreign pointers are forwarded along the chain
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::{Allocator, MemorySystem, mb};
//!
//! let system = MemorySystem::bootstrap("mem.ini".as_ref())?;
//! let level = system.create_arena(mb(4))?;
//! {
//!     let _scope = system.push_current(&level);
//!     let ptr = system.allocate(256); // served by `level`
//!     system.deallocate(ptr);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod id;
pub mod memory;
pub mod size;
pub mod system;

pub use allocator::Allocator;
pub use config::{MemoryConfig, CONFIG_FILE, DEFAULT_BUDGET, MAX_BUDGET};
pub use context::{ScopedAllocator, FRAME_SIZE};
pub use error::{fatal, MemoryError, MemoryResult};
pub use handle::ArenaHandle;
pub use id::{ArenaId, BlockPtr};
pub use memory::{ArenaStats, UsageHistogram, HEADER_SIZE, POISON_BYTE};
pub use size::{align, checked_align, format_size, gb, kb, mb, WORD};
pub use system::MemorySystem;
