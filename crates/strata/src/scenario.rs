//! # Probe Scenarios
//!
//! Small end-to-end workloads run by `strata_probe`. Each one drives the
//! memory system through its process-facing API, so fatal paths really
//! terminate the process.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use strata_core::{kb, Allocator, MemoryResult, MemorySystem};

/// A named probe workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Allocate, write, read back, and free one block in the global arena.
    Boot,
    /// Ask a small arena for more than it holds. Never returns.
    Exhaust,
    /// Nested state arenas with cross-arena frees.
    States,
}

impl Scenario {
    /// Runs the scenario against `system`.
    ///
    /// # Errors
    ///
    /// Any recoverable memory error raised by the workload.
    pub fn run(self, system: &MemorySystem) -> MemoryResult<()> {
        match self {
            Self::Boot => boot(system),
            Self::Exhaust => exhaust(system),
            Self::States => states(system),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boot => "boot",
            Self::Exhaust => "exhaust",
            Self::States => "states",
        })
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boot" => Ok(Self::Boot),
            "exhaust" => Ok(Self::Exhaust),
            "states" => Ok(Self::States),
            other => Err(format!("unknown scenario: {other}")),
        }
    }
}

fn boot(system: &MemorySystem) -> MemoryResult<()> {
    let ptr = system.allocate(kb(1));
    system.write(ptr, 0, b"strata")?;
    let mut out = [0u8; 6];
    system.read(ptr, 0, &mut out)?;
    debug_assert_eq!(&out, b"strata");
    system.deallocate(ptr);
    tracing::info!(stats = %system.stats(system.global())?, "boot complete");
    Ok(())
}

fn exhaust(system: &MemorySystem) -> MemoryResult<()> {
    let small = system.create_arena(kb(64))?;
    let _scope = system.push_current(&small);
    tracing::info!(arena = %small.id(), "requesting more than the arena holds");
    let ptr = system.allocate(kb(128));
    // unreachable: exhaustion terminates the process
    system.deallocate(ptr);
    Ok(())
}

fn states(system: &MemorySystem) -> MemoryResult<()> {
    let menu = system.create_arena(kb(256))?;
    let level = system.create_arena(kb(512))?;

    let menu_scope = system.push_current(&menu);
    let title = system.allocate(128);
    system.write_pod(title, 0, &0x5354_5241_u32)?;

    let level_scope = system.push_current(&level);
    let mut entities = Vec::with_capacity(64);
    for i in 0..64_u32 {
        let ptr = system.allocate(32);
        system.write_pod(ptr, 0, &i)?;
        entities.push(ptr);
    }
    // freed from the level context, owned by the menu arena
    let scratch = menu.try_allocate(64)?;
    system.deallocate(scratch);
    for ptr in entities {
        system.deallocate(ptr);
    }
    let popped = level_scope.pop();
    tracing::info!(arena = %popped, "left level state");

    system.deallocate(title);
    let popped = menu_scope.pop();
    tracing::info!(arena = %popped, depth = system.context_depth(), "left menu state");

    for arena in [&menu, &level] {
        arena.release_retained();
        tracing::info!(stats = %arena.stats(), "state arena after exit");
    }
    Ok(())
}

/// Writes a memory dump of `system` into `dir` and logs the files written.
///
/// # Errors
///
/// Anything [`MemorySystem::debug`] reports.
pub fn dump(system: &MemorySystem, dir: &Path) -> MemoryResult<()> {
    let files = system.debug(dir)?;
    for file in files {
        tracing::info!(path = %file.display(), "wrote arena dump");
    }
    Ok(())
}
