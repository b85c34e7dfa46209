use std::time::Duration;

use crate::RetryConfig;

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.notte.cc";
/// Environment variable overriding the API endpoint.
pub const ENV_API_URL: &str = "NOTTE_API_URL";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "NOTTE_API_KEY";

/// Configures endpoint, HTTP pooling, timeout, retry and circuit breaker behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// API base URL without trailing path.
    pub base_url: String,
    /// Client version sent with every request; may be empty.
    pub version: String,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept, in milliseconds.
    pub pool_idle_timeout_ms: u64,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    /// How long the breaker stays open, in milliseconds.
    pub breaker_reset_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            timeout_ms: 45_000,
            pool_max_idle_per_host: 10,
            pool_idle_timeout_ms: 90_000,
            retry: RetryConfig::default(),
            breaker_threshold: 5,
            breaker_reset_ms: 30_000,
        }
    }
}

impl ClientOptions {
    /// Defaults with `NOTTE_API_URL` applied when set and non-empty.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                options.base_url = url.trim().to_owned();
            }
        }
        options
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the version sent in the SDK version header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the breaker threshold and open period.
    pub fn with_breaker(mut self, threshold: u32, reset_period: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_reset_ms = reset_period.as_millis() as u64;
        self
    }

    /// Breaker open period as a [`Duration`].
    pub fn breaker_reset_period(&self) -> Duration {
        Duration::from_millis(self.breaker_reset_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::sync::PoisonError;

    use super::{ClientOptions, DEFAULT_BASE_URL, ENV_API_URL};
    use crate::ENV_LOCK;

    #[test]
    fn defaults_match_cli_tuning() {
        let options = ClientOptions::default();
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.timeout_ms, 45_000);
        assert_eq!(options.pool_max_idle_per_host, 10);
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(options.retry.max_backoff, Duration::from_secs(30));
        assert!(options.retry.jitter);
        assert_eq!(options.breaker_threshold, 5);
        assert_eq!(options.breaker_reset_period(), Duration::from_secs(30));
    }

    #[test]
    fn builders_override_fields() {
        let options = ClientOptions::default()
            .with_base_url("http://localhost:8000")
            .with_version("")
            .with_breaker(2, Duration::from_millis(250));
        assert_eq!(options.base_url, "http://localhost:8000");
        assert!(options.version.is_empty());
        assert_eq!(options.breaker_threshold, 2);
        assert_eq!(options.breaker_reset_ms, 250);
    }

    #[test]
    fn from_env_applies_api_url_and_ignores_blank() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::var(ENV_API_URL).ok();

        std::env::set_var(ENV_API_URL, "  http://localhost:8000  ");
        assert_eq!(ClientOptions::from_env().base_url, "http://localhost:8000");

        std::env::set_var(ENV_API_URL, "   ");
        assert_eq!(ClientOptions::from_env().base_url, DEFAULT_BASE_URL);

        std::env::remove_var(ENV_API_URL);
        let options = ClientOptions::from_env();
        assert_eq!(options, ClientOptions::default());

        if let Some(value) = previous {
            std::env::set_var(ENV_API_URL, value);
        }
    }
}
