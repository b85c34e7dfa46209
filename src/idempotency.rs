use std::fmt::Write;

use rand::{rngs::OsRng, RngCore};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};

/// Header carrying the idempotency key on mutating requests.
pub const IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("idempotency-key");

const KEY_BYTES: usize = 32;

/// Generates a 256-bit random key encoded as 64 lowercase hex characters.
///
/// Fails only if the operating system entropy source fails.
pub fn generate_idempotency_key() -> Result<String, rand::Error> {
    let mut bytes = [0u8; KEY_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;

    let mut key = String::with_capacity(KEY_BYTES * 2);
    for byte in bytes {
        // Writing into a String cannot fail.
        let _ = write!(key, "{byte:02x}");
    }
    Ok(key)
}

/// Returns true for methods that modify server state.
pub fn is_mutating_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Attaches an idempotency key to a mutating request unless one is already set.
///
/// Key generation failure leaves the headers untouched; the request proceeds
/// without a key rather than failing.
pub fn attach_idempotency_key(method: &Method, headers: &mut HeaderMap) {
    if !is_mutating_method(method) || headers.contains_key(IDEMPOTENCY_KEY_HEADER) {
        return;
    }

    match generate_idempotency_key() {
        Ok(key) => {
            if let Ok(value) = HeaderValue::from_str(&key) {
                headers.insert(IDEMPOTENCY_KEY_HEADER, value);
            }
        }
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "idempotency key generation failed; sending without key");
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{HeaderMap, HeaderValue},
        Method,
    };

    use super::{
        attach_idempotency_key, generate_idempotency_key, is_mutating_method,
        IDEMPOTENCY_KEY_HEADER,
    };

    fn is_lower_hex(key: &str) -> bool {
        key.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    #[test]
    fn generated_key_is_64_lowercase_hex_chars() {
        let key = generate_idempotency_key().expect("entropy source must work");
        assert_eq!(key.len(), 64);
        assert!(is_lower_hex(&key));
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = generate_idempotency_key().expect("entropy source must work");
        let b = generate_idempotency_key().expect("entropy source must work");
        assert_ne!(a, b);
    }

    #[test]
    fn mutating_methods() {
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(is_mutating_method(&method), "{method} must be mutating");
        }
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            assert!(!is_mutating_method(&method), "{method} must not be mutating");
        }
    }

    #[test]
    fn attaches_key_only_to_mutating_requests() {
        let mut post = HeaderMap::new();
        attach_idempotency_key(&Method::POST, &mut post);
        let key = post
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("POST must carry a key");
        assert_eq!(key.len(), 64);
        assert!(is_lower_hex(key));

        let mut get = HeaderMap::new();
        attach_idempotency_key(&Method::GET, &mut get);
        assert!(get.get(IDEMPOTENCY_KEY_HEADER).is_none());
    }

    #[test]
    fn keeps_caller_supplied_key() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("caller-key"));
        attach_idempotency_key(&Method::PUT, &mut headers);
        assert_eq!(
            headers.get(IDEMPOTENCY_KEY_HEADER),
            Some(&HeaderValue::from_static("caller-key"))
        );
    }
}
