//! Maps non-2xx responses onto [`NotteError`].
//!
//! The API is not consistent about error bodies. In order, the classifier
//! tries:
//! - `{"error": {"code", "message", "source"}}`
//! - `{"error": "<text>"}`
//! - `{"message": "<text>"}`
//! - `{"detail": "<text>"}` or `{"detail": [{"loc", "msg", "type"}, ...]}`
//!
//! and falls back to the raw body text. Every extracted message goes through
//! [`sanitize_message`] before it is stored.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    StatusCode,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{error::AuthReason, NotteError};

/// Longest message kept from a server response, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Delay assumed when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorField>,
    #[serde(default)]
    message: Option<JsonValue>,
    #[serde(default)]
    detail: Option<Detail>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Nested(NestedError),
    Flat(String),
    Other(JsonValue),
}

#[derive(Debug, Deserialize)]
struct NestedError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Detail {
    Text(String),
    Entries(Vec<DetailEntry>),
    Other(JsonValue),
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct DetailEntry {
    #[serde(default)]
    loc: Vec<JsonValue>,
    #[serde(default)]
    msg: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Extracted {
    code: String,
    message: String,
    source: Option<String>,
}

/// Classifies a non-2xx status, its headers and raw body into a typed error.
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> NotteError {
    let text = String::from_utf8_lossy(body);
    let extracted = extract(&text);

    match status {
        StatusCode::TOO_MANY_REQUESTS => NotteError::RateLimit {
            retry_after: parse_retry_after(headers),
            message: extracted.map(|e| e.message).unwrap_or_default(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NotteError::Auth {
            reason: if status == StatusCode::UNAUTHORIZED {
                AuthReason::Invalid
            } else {
                AuthReason::Forbidden
            },
            message: extracted.map(|e| e.message).unwrap_or_default(),
            status_code: status.as_u16(),
        },
        _ => {
            let Extracted {
                mut code,
                mut message,
                source,
            } = extracted.unwrap_or_else(|| Extracted {
                message: sanitize_message(&text),
                ..Extracted::default()
            });

            let reason = status.canonical_reason().unwrap_or("Unknown Error");
            if code.is_empty() {
                code = reason.to_owned();
            }
            if message.is_empty() {
                message = reason.to_owned();
            }

            NotteError::Api {
                code,
                message,
                status_code: status.as_u16(),
                source_field: source,
                cause: None,
            }
        }
    }
}

/// Reads the response body and classifies it.
///
/// A body that cannot be read still yields an `Api` error carrying the read
/// failure as its cause.
pub async fn classify_response(response: reqwest::Response) -> NotteError {
    let status = response.status();
    let headers = response.headers().clone();

    match response.bytes().await {
        Ok(body) => classify(status, &headers, &body),
        Err(err) => NotteError::Api {
            code: status.canonical_reason().unwrap_or_default().to_owned(),
            message: "failed to read response body".to_owned(),
            status_code: status.as_u16(),
            source_field: None,
            cause: Some(Box::new(err)),
        },
    }
}

/// Parses `Retry-After` as integer seconds, defaulting to 60 seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Makes untrusted server text safe to print.
///
/// Truncates to [`MAX_MESSAGE_CHARS`] characters (appending `...`), then
/// removes every control character except newline.
pub fn sanitize_message(message: &str) -> String {
    let truncated = match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => format!("{}...", &message[..cut]),
        None => message.to_owned(),
    };

    truncated
        .chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .collect()
}

fn extract(text: &str) -> Option<Extracted> {
    let body: ErrorBody = serde_json::from_str(text).ok()?;

    let mut extracted = Extracted::default();
    let mut message = None;

    match body.error {
        Some(ErrorField::Nested(nested)) => {
            extracted.code = nested.code.unwrap_or_default();
            extracted.source = nested.source.filter(|s| !s.is_empty());
            message = nested.message.filter(|m| !m.is_empty());
        }
        Some(ErrorField::Flat(text)) if !text.is_empty() => message = Some(text),
        _ => {}
    }

    if message.is_none() {
        message = body
            .message
            .as_ref()
            .and_then(JsonValue::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_owned);
    }

    if message.is_none() {
        match body.detail {
            Some(Detail::Text(text)) if !text.is_empty() => message = Some(text),
            Some(Detail::Entries(entries)) if !entries.is_empty() => {
                if extracted.source.is_none() {
                    extracted.source = entries.first().and_then(|entry| location(&entry.loc));
                }
                let joined = entries
                    .iter()
                    .map(|entry| entry.msg.as_str())
                    .filter(|msg| !msg.is_empty())
                    .collect::<Vec<_>>()
                    .join("; ");
                message = Some(joined).filter(|m| !m.is_empty());
            }
            _ => {}
        }
    }

    // A JSON body with none of the known fields is treated as unparsed.
    if message.is_none() && extracted.code.is_empty() {
        return None;
    }

    extracted.message = sanitize_message(&message.unwrap_or_default());
    Some(extracted)
}

fn location(loc: &[JsonValue]) -> Option<String> {
    let parts: Vec<String> = loc
        .iter()
        .map(|part| match part {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("."))
}
