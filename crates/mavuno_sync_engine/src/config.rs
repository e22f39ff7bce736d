//! Configuration for the sync engine.

use std::time::Duration;

/// Default persisted key holding the mutation queue.
pub const DEFAULT_QUEUE_KEY: &str = "syncQueue";

/// Default prefix for persisted cache entries.
pub const DEFAULT_CACHE_PREFIX: &str = "cache_";

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound on every live network attempt.
    pub request_timeout: Duration,
    /// Freshness window for cached GET responses.
    pub default_ttl: Duration,
    /// Replay attempts before a queued mutation is dropped.
    pub max_attempts: u32,
    /// Store key holding the serialized queue.
    pub queue_key: String,
    /// Store key prefix for cache entries.
    pub cache_prefix: String,
    /// Interval for the optional periodic flush trigger.
    pub flush_interval: Option<Duration>,
    /// Capacity of the diagnostics channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            default_ttl: Duration::from_secs(60 * 60),
            max_attempts: 3,
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            flush_interval: None,
            event_capacity: 256,
        }
    }

    /// Sets the live request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default cache TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the replay attempt limit. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the persisted queue key.
    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    /// Sets the persisted cache key prefix.
    pub fn with_cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Enables the periodic flush trigger.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Sets the diagnostics channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Returns the store key for a cached endpoint.
    pub fn cache_key(&self, endpoint: &str) -> String {
        format!("{}{}", self.cache_prefix, endpoint)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
