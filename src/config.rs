//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CacheError, Result};

// == Defaults ==
const DEFAULT_WORKER_COUNT: usize = 20;
const DEFAULT_QUEUE_CAPACITY: usize = 200;
const DEFAULT_MAX_ENTRIES: usize = 20;
const DEFAULT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_LOOP_INTERVAL_MS: u64 = 1000;
const DEFAULT_REFRESH_LOOKAHEAD_MS: u64 = 300;

/// Longest accepted scan cadence
const MAX_LOOP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Number of concurrent refresh workers
    pub worker_count: usize,
    /// Pending refresh jobs allowed before the refresh loop waits
    pub queue_capacity: usize,
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Revocation window for entries that do not set their own TTL
    pub default_ttl: Duration,
    /// Cadence of the refresh and revoke scans
    pub loop_interval: Duration,
    /// How long before expiry a refresh is triggered
    pub refresh_lookahead: Duration,
}

impl Config {
    /// Creates a config with the given pool, queue, capacity and TTL settings.
    ///
    /// Loop interval and refresh lookahead keep their defaults.
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        max_entries: usize,
        default_ttl: Duration,
    ) -> Self {
        Self {
            worker_count,
            queue_capacity,
            max_entries,
            default_ttl,
            ..Self::default()
        }
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_WORKERS` - Refresh worker count (default: 20)
    /// - `CACHE_QUEUE_CAPACITY` - Refresh job queue bound (default: 200)
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 20)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 3600)
    /// - `CACHE_LOOP_INTERVAL_MS` - Scan cadence in milliseconds (default: 1000)
    /// - `CACHE_REFRESH_LOOKAHEAD_MS` - Refresh lookahead in milliseconds (default: 300)
    pub fn from_env() -> Self {
        Self {
            worker_count: env_or("CACHE_WORKERS", DEFAULT_WORKER_COUNT),
            queue_capacity: env_or("CACHE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            max_entries: env_or("CACHE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
            default_ttl: Duration::from_secs(env_or("CACHE_DEFAULT_TTL", DEFAULT_TTL_SECS)),
            loop_interval: Duration::from_millis(env_or(
                "CACHE_LOOP_INTERVAL_MS",
                DEFAULT_LOOP_INTERVAL_MS,
            )),
            refresh_lookahead: Duration::from_millis(env_or(
                "CACHE_REFRESH_LOOKAHEAD_MS",
                DEFAULT_REFRESH_LOOKAHEAD_MS,
            )),
        }
    }

    /// Sets the scan cadence of both background loops.
    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    /// Sets how early before expiry a refresh is triggered.
    pub fn with_refresh_lookahead(mut self, lookahead: Duration) -> Self {
        self.refresh_lookahead = lookahead;
        self
    }

    // == Validate ==
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(CacheError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.loop_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "loop_interval must be non-zero".to_string(),
            ));
        }
        if self.loop_interval > MAX_LOOP_INTERVAL {
            return Err(CacheError::InvalidConfig(format!(
                "loop_interval must not exceed {:?}",
                MAX_LOOP_INTERVAL
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            loop_interval: Duration::from_millis(DEFAULT_LOOP_INTERVAL_MS),
            refresh_lookahead: Duration::from_millis(DEFAULT_REFRESH_LOOKAHEAD_MS),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
