//! Cache statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters for cache behaviour
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from fresh cached data
    pub hits: u64,

    /// Reads that found no usable data
    pub misses: u64,

    /// Underlying fetches started (retries not included)
    pub fetches: u64,

    /// Callers that joined an already running fetch
    pub deduplicated: u64,

    /// Retry attempts after a failure
    pub retries: u64,

    /// Fetches that failed after all retries
    pub failures: u64,

    /// Background refetches triggered by reading stale data
    pub stale_refetches: u64,

    /// Completions dropped because a newer generation exists
    pub discarded: u64,

    /// Entries removed by garbage collection
    pub evictions: u64,

    /// Entries marked stale by invalidation
    pub invalidations: u64,

    /// Number of entries currently in the store
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Share of fetch requests served by an existing in-flight fetch
    pub fn dedup_rate(&self) -> f64 {
        let total = self.fetches + self.deduplicated;
        if total == 0 {
            0.0
        } else {
            (self.deduplicated as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, fetches: {}, deduplicated: {}, failures: {}, entries: {}, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.fetches,
            self.deduplicated,
            self.failures,
            self.entries,
            self.evictions
        )
    }
}
