//! Client-side error types.

use serde::Deserialize;

/// API error type for client-side use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Human-readable message suitable for surfacing to a user. For HTTP
    /// errors, prefers a structured detail from the response body.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Http { status, body } => try_error_detail(body)
                .unwrap_or_else(|| format!("request failed with status {status}")),
            other => other.to_string(),
        }
    }

    /// For the duplicate-direct-thread conflict the backend returns the id
    /// of the already-existing thread in the error body.
    pub fn existing_thread_id(&self) -> Option<String> {
        let ApiError::Http { body, .. } = self else {
            return None;
        };
        let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
        parsed
            .get("existing_thread_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Attempt to parse a JSON error body into a user-facing message.
/// Prefers `error`, then `detail`, then `message`.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    [parsed.error, parsed.detail, parsed.message]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_prefers_structured_error_field() {
        let err = ApiError::Http {
            status: 403,
            body: r#"{"error":"Only admins can post in this thread"}"#.into(),
        };
        assert_eq!(err.detail(), "Only admins can post in this thread");
    }

    #[test]
    fn detail_falls_back_on_unparseable_body() {
        let err = ApiError::Http {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert_eq!(err.detail(), "request failed with status 502");
    }

    #[test]
    fn existing_thread_id_extracted_from_conflict_body() {
        let err = ApiError::Http {
            status: 409,
            body: r#"{"error":"Thread already exists","existing_thread_id":"t42"}"#.into(),
        };
        assert_eq!(err.existing_thread_id(), Some("t42".to_string()));
        assert_eq!(ApiError::Network("x".into()).existing_thread_id(), None);
    }
}
