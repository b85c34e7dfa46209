//! Consecutive-failure circuit breaker.
//!
//! State is never stored. It is derived on every read from the failure
//! count, the threshold and the `open_until` deadline:
//!
//! ```text
//! failures <  threshold                      → Closed
//! failures >= threshold, now <  open_until   → Open
//! failures >= threshold, now >= open_until   → HalfOpen
//! ```
//!
//! Half-open admits every caller until the next recorded outcome; there is
//! no single-probe gating.

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

// Open deadlines further out than this are clamped.
const MAX_OPEN_PERIOD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Derived breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name used in logs and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Counters {
    failures: u32,
    open_until: Option<Instant>,
}

/// Tracks consecutive failures for one client and denies calls while open.
///
/// Shared across every request of a client, typically behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_period: Duration,
    counters: RwLock<Counters>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `threshold` consecutive failures
    /// and stays open for `reset_period`.
    pub fn new(threshold: u32, reset_period: Duration) -> Self {
        Self {
            threshold,
            reset_period,
            counters: RwLock::new(Counters::default()),
        }
    }

    /// Returns false only while the breaker is open.
    pub fn allow(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Current state, recomputed against the clock on every call.
    pub fn state(&self) -> CircuitState {
        let counters = self.read();
        self.state_at(&counters, Instant::now())
    }

    /// Clears the failure count and any open deadline.
    pub fn record_success(&self) {
        let mut counters = self.write();
        counters.failures = 0;
        counters.open_until = None;
    }

    /// Counts a failure; reaching the threshold (re)arms the open deadline.
    pub fn record_failure(&self) {
        let open_until = self.deadline_from(Instant::now());

        let mut counters = self.write();
        counters.failures = counters.failures.saturating_add(1);

        if counters.failures >= self.threshold {
            counters.open_until = Some(open_until);

            #[cfg(feature = "tracing")]
            tracing::warn!(
                failures = counters.failures,
                threshold = self.threshold,
                reset_period_ms = self.reset_period.as_millis() as u64,
                "circuit breaker open"
            );
        }
    }

    /// Consecutive failures recorded since the last success.
    pub fn failures(&self) -> u32 {
        self.read().failures
    }

    /// Deadline until which the breaker denies calls, if it has tripped.
    pub fn open_until(&self) -> Option<Instant> {
        self.read().open_until
    }

    /// Consecutive failures needed to open the breaker.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// How long the breaker stays open once tripped.
    pub fn reset_period(&self) -> Duration {
        self.reset_period
    }

    fn deadline_from(&self, now: Instant) -> Instant {
        now.checked_add(self.reset_period)
            .or_else(|| now.checked_add(MAX_OPEN_PERIOD))
            .unwrap_or(now)
    }

    fn state_at(&self, counters: &Counters, now: Instant) -> CircuitState {
        if counters.failures < self.threshold {
            return CircuitState::Closed;
        }

        match counters.open_until {
            Some(open_until) if now < open_until => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    // Every write leaves the counters consistent, so a poisoned lock is safe
    // to keep using.
    fn read(&self) -> RwLockReadGuard<'_, Counters> {
        self.counters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Counters> {
        self.counters.write().unwrap_or_else(PoisonError::into_inner)
    }
}
