//! Request execution layers.
//!
//! [`Transport`] is the single seam between callers and the network:
//! one request in, one response or error out. [`HttpTransport`] is the
//! reqwest-backed leaf; [`ResilientTransport`] wraps any other transport with
//! authentication headers, idempotency keys, retries and a circuit breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{
    header::{HeaderName, HeaderValue, AUTHORIZATION},
    tls, Request, Response,
};
use tokio_util::sync::CancellationToken;

use crate::{
    idempotency::attach_idempotency_key, CircuitBreaker, ClientOptions,
    NotteError, Result, RetryConfig,
};

/// Header tagging the request origin.
pub const REQUEST_ORIGIN_HEADER: HeaderName = HeaderName::from_static("x-notte-request-origin");
/// Header carrying the client build version.
pub const SDK_VERSION_HEADER: HeaderName = HeaderName::from_static("x-notte-sdk-version");
/// Value of [`REQUEST_ORIGIN_HEADER`] for this client.
pub const REQUEST_ORIGIN: &str = "cli";

/// Executes one HTTP request.
///
/// Network-level failures are reported as [`NotteError::Transport`]; any
/// HTTP status, including errors, is a successful `Response`.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        (**self).send(request)
    }
}

/// Leaf transport backed by a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with TLS 1.2 or newer and bounded connection pooling.
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .min_tls_version(tls::Version::TLS_1_2)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_millis(options.pool_idle_timeout_ms))
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()?;
        Ok(Self { http })
    }

    /// Wraps an already configured client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        self.http.execute(request).await.map_err(NotteError::from)
    }
}

/// Adds auth, tracking and idempotency headers, retries according to
/// [`RetryConfig`] and guards the inner transport with a [`CircuitBreaker`].
pub struct ResilientTransport<T> {
    inner: T,
    authorization: HeaderValue,
    version: HeaderValue,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    cancel: CancellationToken,
}

impl<T> std::fmt::Debug for ResilientTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("authorization", &"<redacted>")
            .field("version", &self.version)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ResilientTransport<T> {
    /// Wraps `inner`, authenticating every request with `api_key`.
    ///
    /// Uses the default retry policy and a fresh default breaker.
    pub fn new(inner: T, api_key: &str, version: &str) -> Result<Self> {
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| NotteError::validation("api_key", "contains invalid header characters"))?;
        authorization.set_sensitive(true);
        let version = HeaderValue::from_str(version)
            .map_err(|_| NotteError::validation("version", "contains invalid header characters"))?;

        Ok(Self {
            inner,
            authorization,
            version,
            retry: RetryConfig::default(),
            breaker: Arc::new(CircuitBreaker::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Shares `breaker` with this transport.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Cancels pending attempts and backoff sleeps when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Breaker consulted before and updated after every call.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Retry policy applied to every call.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Wrapped lower transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Sends `request`, aborting with [`NotteError::Cancelled`] when either
    /// `cancel` or the transport's own token fires.
    pub async fn send_with_cancel(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if !self.breaker.allow() {
            let open_until = self.breaker.open_until().unwrap_or_else(std::time::Instant::now);

            #[cfg(feature = "tracing")]
            tracing::warn!(
                method = %request.method(),
                url = %request.url(),
                "circuit breaker open; failing fast"
            );

            return Err(NotteError::CircuitOpen { open_until });
        }

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, self.authorization.clone());
        headers.insert(
            REQUEST_ORIGIN_HEADER,
            HeaderValue::from_static(REQUEST_ORIGIN),
        );
        headers.insert(SDK_VERSION_HEADER, self.version.clone());

        // Generated once so that every attempt carries the same key.
        let method = request.method().clone();
        attach_idempotency_key(&method, request.headers_mut());

        let outcome = self.send_with_retry(&request, cancel).await;

        match &outcome {
            Ok(response) if response.status().as_u16() >= 500 => self.breaker.record_failure(),
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_network() => self.breaker.record_failure(),
            Err(_) => {}
        }

        outcome
    }

    async fn send_with_retry(
        &self,
        template: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let method = template.method().clone();
        let mut attempt = 0u32;

        loop {
            if self.is_cancelled(cancel) {
                return Err(NotteError::Cancelled);
            }

            let request = template.try_clone().ok_or_else(|| {
                NotteError::validation("body", "request body cannot be replayed for retries")
            })?;

            match self.inner.send(request).await {
                Ok(response) => {
                    let status = response.status();
                    if !self.retry.should_retry(status, &method, attempt) {
                        return Ok(response);
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        %method,
                        url = %template.url(),
                        status = status.as_u16(),
                        attempt,
                        "retrying after retryable status"
                    );

                    // Release the connection before sleeping.
                    drop(response);
                }
                Err(err) if err.is_network() => {
                    if !self.retry.should_retry_network(&method, attempt) {
                        return Err(err);
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        %method,
                        url = %template.url(),
                        error = %err,
                        attempt,
                        "retrying after network error"
                    );
                }
                Err(err) => return Err(err),
            }

            self.wait_before_retry(attempt, cancel).await?;
            attempt += 1;
        }
    }

    async fn wait_before_retry(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let delay = self.retry.backoff(attempt);

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay.as_millis());

        tokio::select! {
            _ = cancel.cancelled() => Err(NotteError::Cancelled),
            _ = self.cancel.cancelled() => Err(NotteError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn is_cancelled(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.cancel.is_cancelled()
    }
}

impl<T: Transport> Transport for ResilientTransport<T> {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        self.send_with_cancel(request, &self.cancel)
    }
}
