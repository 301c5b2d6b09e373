//! # Memory Error Types
//!
//! All errors that can occur in the memory system, plus the single fatal
//! exit path used by the process-facing operations.

use thiserror::Error;

use crate::id::{ArenaId, BlockPtr};
use crate::size::format_size;

/// Errors that can occur in the memory system.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The arena cannot satisfy the request, even after releasing retained blocks.
    #[error(
        "failed to allocate {} from allocator {arena}, which has {} available",
        format_size(*requested),
        format_size(*available)
    )]
    Exhausted {
        /// The arena that was asked.
        arena: ArenaId,
        /// Bytes requested (after alignment).
        requested: usize,
        /// Bytes still unused in the arena.
        available: usize,
    },

    /// The arena that owns the block is no longer in the chain.
    #[error("memory leak detected: {ptr} was allocated by allocator {owner}, which was destroyed")]
    UnreachableOwner {
        /// The orphaned pointer.
        ptr: BlockPtr,
        /// The recorded owner.
        owner: ArenaId,
    },

    /// A null pointer was passed where a live block was required.
    #[error("null pointer passed to the memory system")]
    NullPointer,

    /// The pointer does not name a live block of the arena it claims.
    #[error("{ptr} does not refer to a live block of allocator {arena}")]
    InvalidPointer {
        /// The offending pointer.
        ptr: BlockPtr,
        /// The arena that was consulted.
        arena: ArenaId,
    },

    /// A payload access ran past the end of the block.
    #[error("access of {len} bytes at offset {offset} exceeds block {ptr} of {size} bytes")]
    OutOfBounds {
        /// The block accessed.
        ptr: BlockPtr,
        /// Byte offset inside the payload.
        offset: usize,
        /// Length of the access.
        len: usize,
        /// Payload size of the block.
        size: usize,
    },

    /// Arena ids are a single byte; the chain is full.
    #[error("allocator chain is full ({} arenas)", u8::MAX)]
    TooManyArenas,

    /// No live arena has this id.
    #[error("allocator {0} was destroyed or never existed")]
    UnknownArena(ArenaId),

    /// `pop_current` was called with only the base frame on the stack.
    #[error("allocator context stack underflow: the global frame cannot be popped")]
    ContextUnderflow,

    /// The persisted configuration is malformed or out of range.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure while reading config or writing a dump.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Logs `err` and terminates the process.
///
/// The memory system has no fallback allocation strategy, so exhaustion
/// and unrecoverable forwarding failures end here instead of unwinding.
pub fn fatal(err: &MemoryError) -> ! {
    tracing::error!(error = %err, "fatal memory error");
    eprintln!("strata: fatal: {err}");
    std::process::exit(1)
}
