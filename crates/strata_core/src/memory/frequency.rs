//! # Frequency Tracking
//!
//! Per-exact-size allocation rates. Once a size is allocated faster than the
//! hot threshold, its freed blocks are parked here and handed straight back
//! to the next allocation of that size.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Allocation rate record for one exact size.
#[derive(Debug)]
pub struct FrequencyRecord {
    /// Allocations since the last sample.
    recent_count: u32,
    /// Rate measured at the last sample.
    allocs_per_second: f32,
    /// When the current sampling window opened.
    last_sample: Instant,
    /// Last allocation or cache hit of this size.
    last_activity: Instant,
    /// Header offsets of retained blocks of this size.
    cached: Vec<usize>,
}

impl FrequencyRecord {
    fn new(now: Instant) -> Self {
        Self {
            recent_count: 0,
            allocs_per_second: 0.0,
            last_sample: now,
            last_activity: now,
            cached: Vec::new(),
        }
    }

    /// Rate measured at the last completed sampling window.
    #[inline]
    #[must_use]
    pub const fn allocs_per_second(&self) -> f32 {
        self.allocs_per_second
    }

    /// Number of blocks parked for this size.
    #[inline]
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }
}

/// Tuning for [`FrequencyTracker`].
#[derive(Clone, Copy, Debug)]
pub struct FrequencyPolicy {
    /// Allocations per second above which a size is hot.
    pub hot_threshold: f32,
    /// Length of one sampling window.
    pub sample_interval: Duration,
    /// Records idle for longer than this are purged.
    pub idle_timeout: Duration,
    /// Maximum payload bytes parked across all sizes.
    pub budget: usize,
}

/// Frequency records of one arena.
#[derive(Debug)]
pub struct FrequencyTracker {
    records: HashMap<usize, FrequencyRecord>,
    cached_bytes: usize,
    policy: FrequencyPolicy,
}

impl FrequencyTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(policy: FrequencyPolicy) -> Self {
        Self {
            records: HashMap::new(),
            cached_bytes: 0,
            policy,
        }
    }

    /// Payload bytes parked across all sizes.
    #[inline]
    #[must_use]
    pub const fn cached_bytes(&self) -> usize {
        self.cached_bytes
    }

    /// Number of parked blocks across all sizes.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.records.values().map(FrequencyRecord::cached_len).sum()
    }

    /// Record for `size`, if one exists.
    #[must_use]
    pub fn record(&self, size: usize) -> Option<&FrequencyRecord> {
        self.records.get(&size)
    }

    /// Counts an allocation of `size`, creating the record lazily and
    /// closing the sampling window once it has elapsed.
    #[allow(clippy::cast_precision_loss)]
    pub fn note_allocation(&mut self, size: usize, now: Instant) {
        let interval = self.policy.sample_interval;
        let record = self
            .records
            .entry(size)
            .or_insert_with(|| FrequencyRecord::new(now));
        record.recent_count = record.recent_count.saturating_add(1);
        record.last_activity = now;

        let elapsed = now.saturating_duration_since(record.last_sample);
        if elapsed >= interval {
            let secs = elapsed.as_secs_f32().max(f32::EPSILON);
            record.allocs_per_second = record.recent_count as f32 / secs;
            record.recent_count = 0;
            record.last_sample = now;
            if record.allocs_per_second > self.policy.hot_threshold {
                tracing::trace!(size, rate = record.allocs_per_second, "size is hot");
            }
        }
    }

    /// Pops a parked block of exactly `size` bytes.
    pub fn take(&mut self, size: usize) -> Option<usize> {
        let header = self.records.get_mut(&size)?.cached.pop()?;
        self.cached_bytes -= size;
        Some(header)
    }

    /// Parks a freed block if its size is hot and the budget allows.
    pub fn offer(&mut self, size: usize, header: usize) -> bool {
        if self.cached_bytes + size > self.policy.budget {
            return false;
        }
        let threshold = self.policy.hot_threshold;
        match self.records.get_mut(&size) {
            Some(record) if record.allocs_per_second > threshold => {
                record.cached.push(header);
                self.cached_bytes += size;
                true
            }
            _ => false,
        }
    }

    /// Drops records idle for longer than the timeout.
    ///
    /// Returns the parked blocks of the dropped records.
    pub fn purge(&mut self, now: Instant) -> Vec<usize> {
        let timeout = self.policy.idle_timeout;
        let mut released = Vec::new();
        let mut freed_bytes = 0;
        self.records.retain(|&size, record| {
            if now.saturating_duration_since(record.last_activity) <= timeout {
                return true;
            }
            freed_bytes += size * record.cached.len();
            released.append(&mut record.cached);
            false
        });
        self.cached_bytes -= freed_bytes;
        if !released.is_empty() {
            tracing::debug!(blocks = released.len(), bytes = freed_bytes, "purged idle hot-size cache");
        }
        released
    }

    /// Empties every record's cache, keeping the measured rates.
    pub fn drain(&mut self) -> Vec<usize> {
        let mut released = Vec::new();
        for record in self.records.values_mut() {
            released.append(&mut record.cached);
        }
        self.cached_bytes = 0;
        released
    }

    /// Forgets all records.
    pub fn clear(&mut self) {
        self.records.clear();
        self.cached_bytes = 0;
    }
}
