//! `notte-transport` is the resilient API transport behind the Notte CLI.
//!
//! Requests flow through a [`ResilientTransport`], which:
//! - fails fast while the [`CircuitBreaker`] is open
//! - attaches auth, tracking and [`idempotency`] headers
//! - retries per [`RetryConfig`] with cancellable exponential backoff
//!
//! Non-2xx responses are turned into a typed [`NotteError`] by
//! [`classify::classify`]. [`NotteClient`] ties it together for callers.

pub mod classify;
mod circuit;
mod client;
mod error;
pub mod idempotency;
mod options;
mod retry;
pub mod transport;
pub mod validate;

pub use circuit::{CircuitBreaker, CircuitState};
pub use classify::{classify, sanitize_message};
pub use client::NotteClient;
pub use error::{AuthReason, BoxError, NotteError};
pub use options::{ClientOptions, DEFAULT_BASE_URL, ENV_API_KEY, ENV_API_URL};
pub use retry::{is_idempotent, RetryConfig};
pub use transport::{HttpTransport, ResilientTransport, Transport};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, NotteError>;

// Serializes tests that read or write process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
