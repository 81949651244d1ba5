//! Configuration for the query cache

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the query cache
///
/// Defaults follow the image search client this cache was built for:
/// - Stale time: 5 minutes
/// - GC time: 10 minutes
/// - One retry on failure
/// - 300ms debounce on search input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// How long fetched data stays fresh
    pub stale_time: Duration,

    /// How long an unobserved entry is retained after its last write
    pub gc_time: Duration,

    /// Additional attempts after the first failed fetch
    pub retry_count: u32,

    /// Base delay before a retry, doubled on every further attempt
    pub retry_delay: Duration,

    /// Upper bound for the retry delay
    pub max_retry_delay: Duration,

    /// Retry delay jitter factor (0.0 - 1.0)
    pub retry_jitter: f64,

    /// Quiet interval for debounced search input
    pub debounce_delay: Duration,

    /// Interval between garbage collection sweeps
    pub gc_interval: Duration,

    /// Prefetch page N+1 once page N resolves
    pub prefetch_next_page: bool,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            gc_time: Duration::from_secs(10 * 60),
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            retry_jitter: 0.1,
            debounce_delay: Duration::from_millis(300),
            // Sweep on the order of the retention window
            gc_interval: Duration::from_secs(10 * 60),
            prefetch_next_page: true,
            enable_metrics: true,
        }
    }
}

impl QueryConfig {
    /// Create a new builder for query configuration
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry_jitter < 0.0 || self.retry_jitter > 1.0 {
            return Err(QueryError::ConfigError(
                "retry_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.gc_interval.is_zero() {
            return Err(QueryError::ConfigError(
                "gc_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_retry_delay < self.retry_delay {
            return Err(QueryError::ConfigError(
                "max_retry_delay must not be smaller than retry_delay".to_string(),
            ));
        }

        Ok(())
    }

    /// Default per-query options derived from this configuration
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            stale_time: self.stale_time,
            gc_time: self.gc_time,
            retry_count: self.retry_count,
        }
    }

    /// Backoff before retry number `attempt` (1-based), jitter applied
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .retry_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry_delay);

        if self.retry_jitter == 0.0 || base.is_zero() {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.retry_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;

        Duration::from_secs_f64((base_secs + jitter).max(0.0))
    }

    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Recognised variables (all optional):
    /// `PAGEQUERY_STALE_TIME_MS`, `PAGEQUERY_GC_TIME_MS`, `PAGEQUERY_RETRY_COUNT`,
    /// `PAGEQUERY_RETRY_DELAY_MS`, `PAGEQUERY_DEBOUNCE_MS`,
    /// `PAGEQUERY_GC_INTERVAL_MS`, `PAGEQUERY_PREFETCH`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGEQUERY_STALE_TIME_MS")? {
            builder = builder.stale_time(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGEQUERY_GC_TIME_MS")? {
            builder = builder.gc_time(Duration::from_millis(ms));
        }
        if let Some(count) = parse_var::<u32, _>(&lookup, "PAGEQUERY_RETRY_COUNT")? {
            builder = builder.retry_count(count);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGEQUERY_RETRY_DELAY_MS")? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGEQUERY_DEBOUNCE_MS")? {
            builder = builder.debounce_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGEQUERY_GC_INTERVAL_MS")? {
            builder = builder.gc_interval(Duration::from_millis(ms));
        }
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "PAGEQUERY_PREFETCH")? {
            builder = builder.prefetch_next_page(enabled);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<V, F>(lookup: &F, name: &str) -> Result<Option<V>>
where
    V: std::str::FromStr,
    V::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<V>()
            .map(Some)
            .map_err(|e| QueryError::ConfigError(format!("{}={:?}: {}", name, raw, e))),
    }
}

/// Per-query overrides of the cache timing and retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry_count: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryConfig::default().query_options()
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Builder for query configuration
#[derive(Debug, Default)]
pub struct QueryConfigBuilder {
    stale_time: Option<Duration>,
    gc_time: Option<Duration>,
    retry_count: Option<u32>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    retry_jitter: Option<f64>,
    debounce_delay: Option<Duration>,
    gc_interval: Option<Duration>,
    prefetch_next_page: Option<bool>,
    enable_metrics: Option<bool>,
}

impl QueryConfigBuilder {
    /// Set how long fetched data stays fresh
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Set how long unobserved entries are retained
    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    /// Set the number of retries after a failed fetch
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the base retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the retry delay cap
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Set retry jitter factor (0.0 - 1.0)
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    /// Set the debounce delay for search input
    pub fn debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = Some(delay);
        self
    }

    /// Set the garbage collection sweep interval
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Enable or disable next-page prefetching
    pub fn prefetch_next_page(mut self, enable: bool) -> Self {
        self.prefetch_next_page = Some(enable);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the query configuration
    pub fn build(self) -> QueryConfig {
        let defaults = QueryConfig::default();
        let gc_time = self.gc_time.unwrap_or(defaults.gc_time);
        let retry_delay = self.retry_delay.unwrap_or(defaults.retry_delay);

        QueryConfig {
            stale_time: self.stale_time.unwrap_or(defaults.stale_time),
            gc_time,
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            retry_delay,
            max_retry_delay: self
                .max_retry_delay
                .unwrap_or_else(|| defaults.max_retry_delay.max(retry_delay)),
            retry_jitter: self.retry_jitter.unwrap_or(defaults.retry_jitter),
            debounce_delay: self.debounce_delay.unwrap_or(defaults.debounce_delay),
            // Zero gc_time would make for a zero interval; keep the default then
            gc_interval: self.gc_interval.unwrap_or(if gc_time.is_zero() {
                defaults.gc_interval
            } else {
                gc_time
            }),
            prefetch_next_page: self
                .prefetch_next_page
                .unwrap_or(defaults.prefetch_next_page),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations for common use cases
impl QueryConfig {
    /// Always refetch on access, keep unobserved data for 5 minutes
    pub fn realtime() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            gc_interval: Duration::from_secs(5 * 60),
            ..Default::default()
        }
    }

    /// Slow-moving data: fresh for an hour, retained for two
    pub fn long_lived() -> Self {
        Self {
            stale_time: Duration::from_secs(3600),
            gc_time: Duration::from_secs(2 * 3600),
            gc_interval: Duration::from_secs(2 * 3600),
            ..Default::default()
        }
    }
}
