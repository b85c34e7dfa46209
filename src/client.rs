use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::{
    header::{HeaderValue, ACCEPT, CONTENT_TYPE},
    Body, Method, Request, Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    classify::classify_response,
    error::AuthReason,
    options::ENV_API_KEY,
    transport::{HttpTransport, ResilientTransport, Transport},
    CircuitBreaker, ClientOptions, NotteError, Result,
};

/// Client for the Notte API.
///
/// Every call goes through a [`ResilientTransport`], so callers never retry
/// on their own. Non-2xx responses come back as classified [`NotteError`]s.
pub struct NotteClient<T = HttpTransport> {
    transport: ResilientTransport<T>,
    base_url: Url,
    options: ClientOptions,
}

impl<T> fmt::Debug for NotteClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotteClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl NotteClient<HttpTransport> {
    /// Creates a client for the production API with default options.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_options(api_key, ClientOptions::default())
    }

    /// Creates a client backed by a pooled HTTP transport built from `options`.
    pub fn with_options(api_key: &str, options: ClientOptions) -> Result<Self> {
        let transport = HttpTransport::new(&options)?;
        Self::with_transport(api_key, options, transport)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `NOTTE_API_KEY` — API key (required)
    /// - `NOTTE_API_URL` — API base URL (optional)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(NotteError::Auth {
                reason: AuthReason::Missing,
                message: format!("set {ENV_API_KEY} or log in first"),
                status_code: 0,
            });
        }
        Self::with_options(&api_key, ClientOptions::from_env())
    }
}

impl<T: Transport> NotteClient<T> {
    /// Creates a client sending through `transport`, wrapped in the
    /// resilience layer configured by `options`.
    pub fn with_transport(api_key: &str, options: ClientOptions, transport: T) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(NotteError::validation("api_key", "API key is required"));
        }

        let base_url = Url::parse(options.base_url.trim_end_matches('/')).map_err(|err| {
            NotteError::validation("base_url", format!("invalid base URL: {err}"))
        })?;

        let breaker = Arc::new(CircuitBreaker::new(
            options.breaker_threshold,
            options.breaker_reset_period(),
        ));
        let transport = ResilientTransport::new(transport, api_key, &options.version)?
            .with_retry_config(options.retry.clone())
            .with_circuit_breaker(breaker);

        Ok(Self {
            transport,
            base_url,
            options,
        })
    }

    /// Replaces the resilience layer, e.g. to attach a cancellation token.
    pub fn map_transport(
        mut self,
        f: impl FnOnce(ResilientTransport<T>) -> ResilientTransport<T>,
    ) -> Self {
        self.transport = f(self.transport);
        self
    }

    /// Base URL every request path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Options the client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Resilience layer wrapping the underlying transport.
    pub fn transport(&self) -> &ResilientTransport<T> {
        &self.transport
    }

    /// Breaker shared by every call made through this client.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.transport.circuit_breaker()
    }

    /// Builds a bodiless request for `path` relative to the base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<Request> {
        let url = join_url(&self.base_url, path)?;
        let mut request = Request::new(method, url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    /// Builds a request carrying `body` as buffered JSON, replayable on retry.
    pub fn json_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Request> {
        let payload = serde_json::to_vec(body).map_err(|err| {
            NotteError::validation("body", format!("cannot encode request body: {err}"))
        })?;

        let mut request = self.request(method, path)?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(Body::from(payload));
        Ok(request)
    }

    /// Sends `request` and returns the body of a 2xx response.
    ///
    /// Any other status is classified into the error taxonomy.
    pub async fn send(&self, request: Request) -> Result<Bytes> {
        let response = self.transport.send(request).await?;

        if !response.status().is_success() {
            return Err(classify_response(response).await);
        }

        response.bytes().await.map_err(NotteError::from)
    }

    /// Sends a GET and decodes the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let request = self.request(Method::GET, path)?;
        let body = self.send(request).await?;
        decode_json(&body)
    }

    /// Sends `body` as a JSON POST and decodes the JSON response.
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.json_request(Method::POST, path, body)?;
        let body = self.send(request).await?;
        decode_json(&body)
    }

    /// Sends a DELETE, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = self.request(Method::DELETE, path)?;
        self.send(request).await.map(|_| ())
    }
}

fn join_url(base: &Url, path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|err| NotteError::validation("path", format!("invalid request path: {err}")))
}

fn decode_json<R: DeserializeOwned>(body: &[u8]) -> Result<R> {
    // Empty 2xx bodies decode as JSON null so `()`/`Option` targets work.
    let body = if body.is_empty() { b"null".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|err| {
        NotteError::Decode(format!(
            "invalid response JSON: {err}; body: {}",
            String::from_utf8_lossy(body)
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::PoisonError;

    use reqwest::{Method, Url};

    use super::{decode_json, join_url, NotteClient};
    use crate::{AuthReason, ClientOptions, NotteError, ENV_API_KEY, ENV_API_URL, ENV_LOCK};

    #[test]
    fn join_url_handles_slashes() {
        let base = Url::parse("https://api.notte.cc").expect("valid url");
        assert_eq!(
            join_url(&base, "/sessions/start").expect("joinable").as_str(),
            "https://api.notte.cc/sessions/start"
        );

        let nested = Url::parse("http://localhost:8000/v1/").expect("valid url");
        assert_eq!(
            join_url(&nested, "agents").expect("joinable").as_str(),
            "http://localhost:8000/v1/agents"
        );
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = NotteClient::new("  ").expect_err("empty key must be rejected");
        match err {
            NotteError::Validation { field, .. } => assert_eq!(field, "api_key"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = NotteClient::with_options(
            "key",
            ClientOptions::default().with_base_url("not a url"),
        )
        .expect_err("invalid base url must be rejected");
        assert!(matches!(err, NotteError::Validation { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = NotteClient::new("secret-token").expect("client must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn json_request_is_replayable() {
        let client = NotteClient::new("key").expect("client must build");
        let request = client
            .json_request(Method::POST, "/sessions/start", &serde_json::json!({"headless": true}))
            .expect("request must build");
        assert!(request.try_clone().is_some());
        assert_eq!(request.url().path(), "/sessions/start");
    }

    #[test]
    fn decode_json_reports_body() {
        let err = decode_json::<serde_json::Value>(b"not json").expect_err("must fail");
        match err {
            NotteError::Decode(message) => assert!(message.contains("not json")),
            other => panic!("expected decode error, got {other:?}"),
        }
        decode_json::<()>(b"").expect("empty body decodes as null");
    }

    #[test]
    fn from_env_requires_api_key() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::var(ENV_API_KEY).ok();

        for value in [None, Some(""), Some("   ")] {
            match value {
                Some(value) => std::env::set_var(ENV_API_KEY, value),
                None => std::env::remove_var(ENV_API_KEY),
            }
            let err = NotteClient::from_env().expect_err("missing key must be rejected");
            match err {
                NotteError::Auth {
                    reason,
                    status_code,
                    message,
                } => {
                    assert_eq!(reason, AuthReason::Missing);
                    assert_eq!(status_code, 0);
                    assert!(message.contains(ENV_API_KEY));
                }
                other => panic!("expected missing auth error, got {other:?}"),
            }
        }

        match previous {
            Some(value) => std::env::set_var(ENV_API_KEY, value),
            None => std::env::remove_var(ENV_API_KEY),
        }
    }

    #[test]
    fn from_env_reads_key_and_url() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let previous_key = std::env::var(ENV_API_KEY).ok();
        let previous_url = std::env::var(ENV_API_URL).ok();

        std::env::set_var(ENV_API_KEY, "env-token");
        std::env::set_var(ENV_API_URL, "http://localhost:8000");
        let client = NotteClient::from_env().expect("client must build from env");
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/");
        assert!(!format!("{client:?}").contains("env-token"));

        for (name, previous) in [(ENV_API_KEY, previous_key), (ENV_API_URL, previous_url)] {
            match previous {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}
