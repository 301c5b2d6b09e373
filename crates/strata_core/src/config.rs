//! # Memory Configuration
//!
//! Tuning for the memory system plus the persisted base-arena budget.
//!
//! The persisted file (`mem.ini` by default) holds a single decimal integer:
//! the byte budget of the global arena. A missing file is created with the
//! default of 32 MB; anything unreadable is a startup error.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::{MemoryError, MemoryResult};
use crate::id::MAX_OFFSET;
use crate::memory::block::HEADER_SIZE;
use crate::size::{format_size, mb};

/// Default name of the persisted budget file.
pub const CONFIG_FILE: &str = "mem.ini";

/// Budget written to a freshly created config file.
pub const DEFAULT_BUDGET: usize = mb(32);

/// Largest global budget a block pointer can address.
pub const MAX_BUDGET: usize = MAX_OFFSET;

/// The persisted file must be shorter than this.
const MAX_CONFIG_LEN: u64 = 64;

/// Configuration for a [`MemorySystem`](crate::MemorySystem).
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Byte budget of the global arena.
    pub budget_bytes: usize,
    /// Serve every allocation from its own heap buffer instead of arenas.
    pub passthrough: bool,
    /// Deallocations between forward-merge sweeps.
    pub merge_interval: u32,
    /// Allocations between idle hot-size purges.
    pub purge_interval: u32,
    /// Allocations per second above which a size is cached.
    pub hot_threshold: f32,
    /// Length of one frequency sampling window.
    pub sample_interval: Duration,
    /// Hot-size records idle for this long are purged.
    pub idle_timeout: Duration,
    /// Free pools may retain at most `capacity / pool_fraction` bytes.
    pub pool_fraction: usize,
    /// The hot-size cache may retain at most `capacity / frequency_fraction` bytes.
    pub frequency_fraction: usize,
    /// Stamp reset arenas with [`POISON_BYTE`](crate::memory::POISON_BYTE).
    pub poison_on_reset: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET,
            passthrough: false,
            merge_interval: 50,
            purge_interval: 256,
            hot_threshold: 20.0,
            sample_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(5),
            pool_fraction: 4,
            frequency_fraction: 8,
            poison_on_reset: cfg!(debug_assertions),
        }
    }
}

impl MemoryConfig {
    /// Default tuning with the given global budget.
    #[must_use]
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            ..Self::default()
        }
    }

    /// Sets passthrough mode.
    #[must_use]
    pub const fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    /// Sets the merge sweep interval.
    #[must_use]
    pub const fn with_merge_interval(mut self, deallocations: u32) -> Self {
        self.merge_interval = deallocations;
        self
    }

    /// Sets the hot-size threshold and sampling window.
    #[must_use]
    pub const fn with_hot_sizes(mut self, threshold: f32, sample_interval: Duration) -> Self {
        self.hot_threshold = threshold;
        self.sample_interval = sample_interval;
        self
    }

    /// Sets the idle purge cadence and timeout.
    #[must_use]
    pub const fn with_purge(mut self, interval: u32, idle_timeout: Duration) -> Self {
        self.purge_interval = interval;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the free-pool retention fraction. Zero disables the pools.
    #[must_use]
    pub const fn with_pool_fraction(mut self, fraction: usize) -> Self {
        self.pool_fraction = fraction;
        self
    }

    /// Sets the hot-size cache retention fraction. Zero disables the cache.
    #[must_use]
    pub const fn with_frequency_fraction(mut self, fraction: usize) -> Self {
        self.frequency_fraction = fraction;
        self
    }

    /// Sets reset poisoning.
    #[must_use]
    pub const fn with_poison_on_reset(mut self, poison: bool) -> Self {
        self.poison_on_reset = poison;
        self
    }

    /// Loads the global budget from `path`, creating the file with
    /// [`DEFAULT_BUDGET`] when it does not exist.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] for an empty or oversized file,
    /// non-numeric content, zero, or a budget outside
    /// `2 * HEADER_SIZE + 1..=MAX_BUDGET`;
    /// [`MemoryError::Io`] when the file cannot be read or created.
    pub fn load_or_create(path: &Path) -> MemoryResult<Self> {
        let text = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    budget = %format_size(DEFAULT_BUDGET),
                    "no memory config found, creating one"
                );
                fs::write(path, DEFAULT_BUDGET.to_string())?;
                return Ok(Self::with_budget(DEFAULT_BUDGET));
            }
            Err(e) => return Err(e.into()),
        };

        if text.is_empty() || text.len() as u64 >= MAX_CONFIG_LEN {
            return Err(MemoryError::InvalidConfig(format!(
                "{} is either empty or too big; it must be between 1 and {} bytes",
                path.display(),
                MAX_CONFIG_LEN - 1
            )));
        }
        let budget = parse_budget(&String::from_utf8_lossy(&text))?;
        Ok(Self::with_budget(budget))
    }

    /// Checks the invariants [`MemorySystem::new`](crate::MemorySystem::new) relies on.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] when the budget cannot hold a block
    /// or exceeds [`MAX_BUDGET`].
    pub fn validate(&self) -> MemoryResult<()> {
        if self.budget_bytes <= 2 * HEADER_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "memory budget of {} cannot hold a single block",
                format_size(self.budget_bytes)
            )));
        }
        if self.budget_bytes > MAX_BUDGET {
            return Err(MemoryError::InvalidConfig(format!(
                "memory budget of {} exceeds the addressable maximum of {}",
                format_size(self.budget_bytes),
                format_size(MAX_BUDGET)
            )));
        }
        Ok(())
    }
}

/// Parses the persisted budget text.
fn parse_budget(text: &str) -> MemoryResult<usize> {
    let trimmed = text.trim();
    let budget: usize = trimmed.parse().map_err(|_| {
        MemoryError::InvalidConfig(format!("invalid memory size specified: {trimmed:?}"))
    })?;
    if budget == 0 {
        return Err(MemoryError::InvalidConfig(
            "invalid memory size specified: 0".to_string(),
        ));
    }
    let config = MemoryConfig::with_budget(budget);
    config.validate()?;
    Ok(budget)
}
