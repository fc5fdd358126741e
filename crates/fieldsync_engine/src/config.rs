//! Configuration for the sync engine.

use std::time::Duration;

/// A server collection mirrored into the local snapshot cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStore {
    /// Local store name, e.g. `"planters"`.
    pub name: String,
    /// URL fetched to refresh this store.
    pub url: String,
}

impl CachedStore {
    /// Creates a cached-store route.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-request deadline for replayed mutations and cache fetches.
    pub request_timeout: Duration,
    /// Interval for automatic sync passes while online. `None` disables
    /// the periodic trigger; connectivity and manual triggers still fire.
    pub sync_interval: Option<Duration>,
    /// Age past which a cached snapshot is considered stale.
    pub cache_max_age: Duration,
    /// Collections refreshed after a successful sync pass.
    pub cached_stores: Vec<CachedStore>,
    /// Retry and backoff behavior.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Creates a configuration with default timings and no cached stores.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            sync_interval: Some(Duration::from_secs(300)),
            cache_max_age: Duration::from_secs(24 * 60 * 60),
            cached_stores: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the automatic sync interval.
    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the snapshot staleness window.
    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    /// Adds a collection to refresh into the snapshot cache.
    pub fn with_cached_store(mut self, store: CachedStore) -> Self {
        self.cached_stores.push(store);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry and backoff behavior for failed sync passes.
///
/// Backoff is deliberately jitter-free: delays are scheduled against a
/// single server by a single client, and deterministic delays keep the
/// engine's behavior reproducible under test.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed pass.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Replay attempts per mutation before it is dead-lettered.
    pub max_attempts: u32,
    /// Consecutive auth failures tolerated before the head mutation is
    /// dead-lettered instead of retried.
    pub auth_retry_limit: u32,
}

impl RetryPolicy {
    /// Creates a retry policy with the given per-mutation attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts,
            auth_retry_limit: 3,
        }
    }

    /// Sets the delay after the first failed pass.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the auth-failure tolerance.
    pub fn with_auth_retry_limit(mut self, limit: u32) -> Self {
        self.auth_retry_limit = limit;
        self
    }

    /// Delay before the next pass after `failed_passes` consecutive
    /// failed passes: `base * 2^(failed_passes - 1)`, capped at the
    /// ceiling. Zero failed passes means no delay.
    pub fn delay_for(&self, failed_passes: u32) -> Duration {
        if failed_passes == 0 {
            return Duration::ZERO;
        }
        let exp = failed_passes.saturating_sub(1).min(32);
        let delay = self
            .base_delay
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}
