//! # STRATA
//!
//! Process entry point for the STRATA memory system:
//! - Installs the `tracing` subscriber
//! - Loads `mem.ini` and builds the [`MemorySystem`]
//! - Runs the probe scenarios exercised by the subprocess tests
//!
//! ## Example
//!
//! ```rust,ignore
//! strata::init_logging();
//! let system = strata::boot(Path::new("mem.ini"));
//! strata::Scenario::States.run(&system)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod scenario;

use std::path::Path;

use strata_core::{fatal, MemorySystem};
use tracing_subscriber::EnvFilter;

pub use scenario::Scenario;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "STRATA_LOG";

/// Installs a stderr fmt subscriber filtered by [`LOG_ENV`] (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Loads the persisted config at `path` and builds the memory system.
///
/// A malformed config ends the process before anything is allocated.
#[must_use]
pub fn boot(path: &Path) -> MemorySystem {
    match MemorySystem::bootstrap(path) {
        Ok(system) => system,
        Err(err) => fatal(&err),
    }
}
