//! Pool sizing and retry policy.

use std::time::Duration;

/// Lower bound on the pool capacity. Requests to size the pool below this are
/// ignored so a misconfigured limit cannot starve the application.
pub const MIN_POOL_CONNECTIONS: usize = 10;

/// Tunables for one [`crate::pool::Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum simultaneously open connections across all datasource names.
    pub max_connections: usize,
    /// How many one-second waits a lease endures at capacity before failing.
    pub retry_attempts: u32,
    /// How long each wait lasts. A returned connection cuts the wait short.
    pub retry_wait: Duration,
    /// Idle time after which routine cleanup closes a free connection.
    pub idle_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            retry_attempts: 60,
            retry_wait: Duration::from_secs(1),
            idle_threshold: Duration::from_secs(300),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity; values under [`MIN_POOL_CONNECTIONS`] are raised to
    /// the floor.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(MIN_POOL_CONNECTIONS);
        self
    }

    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    #[must_use]
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }
}
