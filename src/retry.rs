use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};

// 2^62 seconds is far past any sane ceiling; keeps the multiplier finite.
const MAX_EXPONENT: u32 = 62;

/// Retry tuning shared read-only by every request of a client.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Hard ceiling on any computed backoff, jitter included.
    pub max_backoff: Duration,
    /// Perturbs each backoff by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Decides whether a response with `status` to a `method` request should
    /// be retried after zero-based `attempt`.
    ///
    /// 429 is retried for every method while attempts remain; 5xx only for
    /// idempotent methods. Nothing else is retried.
    pub fn should_retry(&self, status: StatusCode, method: &Method, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return true;
        }

        if status.is_server_error() {
            return is_idempotent(method);
        }

        false
    }

    /// Decides whether a network-level failure should be retried.
    ///
    /// A network error says nothing about whether the server applied a
    /// mutation, so only idempotent methods qualify.
    pub fn should_retry_network(&self, method: &Method, attempt: u32) -> bool {
        attempt < self.max_retries && is_idempotent(method)
    }

    /// Delay before the retry following zero-based `attempt`.
    ///
    /// `initial_backoff * 2^attempt`, jittered by ±25% when enabled, then
    /// clamped to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_EXPONENT) as i32;
        let mut secs = self.initial_backoff.as_secs_f64() * 2f64.powi(exponent);

        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            secs += secs * 0.25 * factor;
        }

        // Clamp after jitter so the ceiling holds for every attempt.
        let secs = secs.min(self.max_backoff.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(secs)
    }
}

/// Returns true for methods that are safe to repeat: GET, HEAD, OPTIONS.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
