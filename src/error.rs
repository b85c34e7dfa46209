use std::fmt;
use std::time::{Duration, Instant};

/// Boxed error used for network-level failures and error causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why an authentication failure happened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthReason {
    /// The API rejected the credentials (401).
    Invalid,
    /// The credentials are valid but lack permission (403).
    Forbidden,
    /// No API key was configured.
    Missing,
}

impl AuthReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Forbidden => "forbidden",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NotteError {
    /// Client-side input rejected before any network attempt.
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
    /// Generic non-2xx response from the API.
    #[error("{}", describe_api(.status_code, .code, .message, .source_field))]
    Api {
        /// Machine-readable code, or the HTTP reason phrase when absent.
        code: String,
        /// Sanitized human-readable message.
        message: String,
        /// HTTP status code.
        status_code: u16,
        /// Request field the API blamed, if any.
        source_field: Option<String>,
        /// Underlying error, e.g. a failed body read.
        #[source]
        cause: Option<BoxError>,
    },
    /// 401 or 403 response, or a missing API key.
    #[error("{}", describe_auth(.reason, .message))]
    Auth {
        reason: AuthReason,
        message: String,
        status_code: u16,
    },
    /// 429 response.
    #[error("{}", describe_rate_limit(.retry_after, .message))]
    RateLimit {
        /// Server-suggested delay; informational only.
        retry_after: Duration,
        message: String,
    },
    /// The circuit breaker denied the call before any network I/O.
    #[error("{}", describe_circuit(.open_until))]
    CircuitOpen { open_until: Instant },
    /// Network or request execution error from the lower transport.
    #[error("network error: {0}")]
    Transport(#[source] BoxError),
    /// The caller cancelled the call before it completed.
    #[error("request cancelled")]
    Cancelled,
    /// A 2xx body that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl NotteError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Returns true if the failure is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => (500..600).contains(status_code),
            _ => false,
        }
    }

    /// Returns true for failures where no HTTP response was received.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// HTTP status associated with the error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } | Self::Auth { status_code, .. } => {
                Some(*status_code).filter(|code| *code != 0)
            }
            Self::RateLimit { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NotteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

fn describe_api(status: &u16, code: &str, message: &str, source: &Option<String>) -> String {
    match source {
        Some(source) if !source.is_empty() => {
            format!("API error ({status}): {code} - {message} [{source}]")
        }
        _ => format!("API error ({status}): {code} - {message}"),
    }
}

fn describe_auth(reason: &AuthReason, message: &str) -> String {
    if message.is_empty() {
        format!("authentication error: {reason}")
    } else {
        format!("authentication error: {reason} - {message}")
    }
}

fn describe_rate_limit(retry_after: &Duration, message: &str) -> String {
    let seconds = retry_after.as_secs();
    let wait = if seconds < 60 {
        format!("{seconds} seconds")
    } else {
        format!("{} minutes", seconds / 60)
    };

    if message.is_empty() {
        format!("rate limit exceeded: too many requests (retry after {wait})")
    } else {
        format!("rate limit exceeded: {message} (retry after {wait})")
    }
}

fn describe_circuit(open_until: &Instant) -> String {
    let remaining = open_until.saturating_duration_since(Instant::now());
    // Round to the nearest second for display.
    let seconds = (remaining.as_millis() + 500) / 1000;
    format!("service unavailable: circuit breaker open, retry in {seconds}s")
}
