//! Client-side input checks.
//!
//! Every check fails with [`NotteError::Validation`] so that bad input is
//! reported before any network attempt.

use reqwest::Url;

use crate::{NotteError, Result};

const MAX_ID_SUFFIX: usize = 64;

/// Rejects empty or whitespace-only values.
pub fn non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NotteError::validation(field, "cannot be empty"));
    }
    Ok(())
}

/// Accepts absolute `http`/`https` URLs with a host.
pub fn url(value: &str, field: &str) -> Result<()> {
    non_empty(value, field)?;

    let parsed = Url::parse(value)
        .map_err(|err| NotteError::validation(field, format!("invalid URL: {err}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(NotteError::validation(
            field,
            format!("URL must use http or https scheme, got {:?}", parsed.scheme()),
        ));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(NotteError::validation(field, "URL must have a host"));
    }

    Ok(())
}

/// Accepts any well-formed JSON document.
pub fn json(value: &str, field: &str) -> Result<()> {
    non_empty(value, field)?;
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| ())
        .map_err(|err| NotteError::validation(field, format!("invalid JSON: {err}")))
}

/// Rejects zero and negative values.
pub fn positive(value: i64, field: &str) -> Result<()> {
    if value <= 0 {
        return Err(NotteError::validation(
            field,
            format!("value must be positive, got {value}"),
        ));
    }
    Ok(())
}

/// Accepts `sess_` session IDs.
pub fn session_id(value: &str) -> Result<()> {
    prefixed_id(value, "sess_", "session ID")
}

/// Accepts `agent_` agent IDs.
pub fn agent_id(value: &str) -> Result<()> {
    prefixed_id(value, "agent_", "agent ID")
}

/// Accepts `wf_` workflow IDs.
pub fn workflow_id(value: &str) -> Result<()> {
    prefixed_id(value, "wf_", "workflow ID")
}

/// Accepts `vault_` vault IDs.
pub fn vault_id(value: &str) -> Result<()> {
    prefixed_id(value, "vault_", "vault ID")
}

/// Accepts `persona_` persona IDs.
pub fn persona_id(value: &str) -> Result<()> {
    prefixed_id(value, "persona_", "persona ID")
}

/// `<prefix>` followed by 1-64 ASCII alphanumerics.
fn prefixed_id(value: &str, prefix: &str, label: &str) -> Result<()> {
    if value.is_empty() {
        return Err(NotteError::validation(label, "cannot be empty"));
    }

    let valid = value.strip_prefix(prefix).is_some_and(|suffix| {
        (1..=MAX_ID_SUFFIX).contains(&suffix.len())
            && suffix.bytes().all(|b| b.is_ascii_alphanumeric())
    });

    if !valid {
        return Err(NotteError::validation(
            label,
            format!("expected {prefix}<alphanumeric 1-{MAX_ID_SUFFIX} chars>, got {value:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::NotteError;

    use super::{agent_id, json, non_empty, persona_id, positive, session_id, url, vault_id, workflow_id};

    #[test]
    fn urls() {
        assert!(url("https://example.com/path", "url").is_ok());
        assert!(url("http://localhost:8000", "url").is_ok());
        assert!(url("", "url").is_err());
        assert!(url("ftp://example.com", "url").is_err());
        assert!(url("not a url", "url").is_err());
    }

    #[test]
    fn json_and_numbers() {
        assert!(json(r#"{"a": 1}"#, "data").is_ok());
        assert!(json("{", "data").is_err());
        assert!(json("", "data").is_err());
        assert!(positive(1, "max_steps").is_ok());
        assert!(positive(0, "max_steps").is_err());
        assert!(non_empty("  ", "task").is_err());
    }

    #[test]
    fn prefixed_ids() {
        assert!(session_id("sess_abc123").is_ok());
        assert!(agent_id("agent_XYZ").is_ok());
        assert!(workflow_id("wf_1").is_ok());
        assert!(vault_id("vault_v1").is_ok());
        assert!(persona_id("persona_p1").is_ok());

        assert!(session_id("sess_").is_err());
        assert!(session_id("agent_abc").is_err());
        assert!(session_id("sess_abc-def").is_err());
        assert!(session_id(&format!("sess_{}", "a".repeat(65))).is_err());
        assert!(session_id(&format!("sess_{}", "a".repeat(64))).is_ok());
    }

    #[test]
    fn failures_are_validation_errors() {
        match session_id("") {
            Err(NotteError::Validation { field, message }) => {
                assert_eq!(field, "session ID");
                assert_eq!(message, "cannot be empty");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
