//! Configuration options for the session manager

use std::time::Duration;

/// Bounded retry budget for refresh calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total calls are `max_retries + 1`
    pub max_retries: u32,

    /// Delay unit; attempt `n` waits `base_delay * (n + 1)`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Backoff before retrying after the failed attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }

    /// Whether another call is allowed after the failed attempt `attempt`
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(1000))
    }
}

/// Configuration options for the session manager
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The base URL of the auth API
    pub base_url: String,

    /// Path of the refresh endpoint, joined onto `base_url`
    pub refresh_path: String,

    /// How long before expiry a persistent session refreshes
    pub persistent_refresh_offset: Duration,

    /// How long before expiry an ephemeral session refreshes
    pub ephemeral_refresh_offset: Duration,

    /// Minimum gap between two effective refreshes
    pub debounce_window: Duration,

    /// Steady-state retry budget
    pub retry: RetryPolicy,

    /// Retry budget used while restoring a session at startup
    pub startup_retry: RetryPolicy,

    /// Ceiling applied to tokens that carry no `exp` claim
    pub max_token_age: Duration,

    /// The request timeout
    pub request_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            persistent_refresh_offset: Duration::from_secs(30 * 60),
            ephemeral_refresh_offset: Duration::from_secs(15 * 60),
            debounce_window: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            startup_retry: RetryPolicy::new(1, Duration::from_millis(500)),
            max_token_age: Duration::from_secs(24 * 60 * 60),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SessionOptions {
    /// Set the base URL of the auth API
    pub fn with_base_url(mut self, value: &str) -> Self {
        self.base_url = value.to_string();
        self
    }

    /// Set the refresh endpoint path
    pub fn with_refresh_path(mut self, value: &str) -> Self {
        self.refresh_path = value.to_string();
        self
    }

    /// Set the refresh offset for persistent sessions
    pub fn with_persistent_refresh_offset(mut self, value: Duration) -> Self {
        self.persistent_refresh_offset = value;
        self
    }

    /// Set the refresh offset for ephemeral sessions
    pub fn with_ephemeral_refresh_offset(mut self, value: Duration) -> Self {
        self.ephemeral_refresh_offset = value;
        self
    }

    /// Set the debounce window
    pub fn with_debounce_window(mut self, value: Duration) -> Self {
        self.debounce_window = value;
        self
    }

    /// Set the steady-state retry policy
    pub fn with_retry(mut self, value: RetryPolicy) -> Self {
        self.retry = value;
        self
    }

    /// Set the startup retry policy
    pub fn with_startup_retry(mut self, value: RetryPolicy) -> Self {
        self.startup_retry = value;
        self
    }

    /// Set the maximum age for tokens without an `exp` claim
    pub fn with_max_token_age(mut self, value: Duration) -> Self {
        self.max_token_age = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }
}
