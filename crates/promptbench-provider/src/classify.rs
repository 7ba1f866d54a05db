//! Failure classification.
//!
//! Maps a raw [`ProviderError`] into a small taxonomy that drives retry
//! policy: rate-limited failures pause the whole job, 5xx failures are
//! retried locally, other 4xx failures are deterministic rejections.
//!
//! Classification is a pure function; it never touches the network or the
//! store.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Failure category, ordered by how the engine reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 429-class throttling. Pauses the whole job, never counts as a row failure.
    RateLimit,
    /// 5xx from the provider. Retried with backoff.
    ServerError,
    /// Non-429 4xx. Deterministic rejection, not retried.
    ClientError,
    /// A typed failure (transport, decoding) without a usable status code.
    RuntimeError,
    /// Anything else.
    UnknownError,
}

impl ErrorKind {
    /// Stable snake_case name, matching what is persisted on failed rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified failure record.
///
/// Consumers derive presentation ("recommend retry" etc.) from the
/// `retryable`/`rate_limited` flags, never from the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMeta {
    /// Human-readable message from the underlying failure.
    pub message: String,
    /// Extracted HTTP-ish status code, if any.
    pub status_code: Option<u16>,
    /// Failure category.
    pub kind: ErrorKind,
    /// Whether a local retry is worthwhile.
    pub retryable: bool,
    /// Whether this is account-wide throttling rather than a per-row failure.
    pub rate_limited: bool,
}

/// Extract a status code from an error, checking in order: direct HTTP
/// status, nested API error code, then a 3-digit 4xx/5xx token embedded in
/// the message text. First match wins.
fn extract_status_code(error: &ProviderError) -> Option<u16> {
    let direct = match error {
        ProviderError::Http { status, .. } => Some(*status),
        ProviderError::Api { code: Some(c), .. } => Some(*c),
        ProviderError::Network(e) => e.status().map(|s| s.as_u16()),
        _ => None,
    };
    direct.or_else(|| status_from_message(&error.to_string()))
}

/// Scan a message for the first standalone 3-digit token in 400..=599.
fn status_from_message(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'4' || b == b'5')
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_digit()
            && bytes[i + 2].is_ascii_digit()
        {
            let preceded = i > 0 && bytes[i - 1].is_ascii_digit();
            let followed = i + 3 < bytes.len() && bytes[i + 3].is_ascii_digit();
            if !preceded && !followed {
                let code = (b - b'0') as u16 * 100
                    + (bytes[i + 1] - b'0') as u16 * 10
                    + (bytes[i + 2] - b'0') as u16;
                return Some(code);
            }
        }
        i += 1;
    }
    None
}

/// Classify a provider failure into [`ErrorMeta`].
pub fn classify(error: &ProviderError) -> ErrorMeta {
    let message = error.to_string();
    let status_code = extract_status_code(error);

    let rate_limited = status_code == Some(429) || message.contains("429");
    let retryable_server = matches!(status_code, Some(code) if (500..=599).contains(&code));
    let retryable = rate_limited || retryable_server;

    let kind = if rate_limited {
        ErrorKind::RateLimit
    } else if retryable_server {
        ErrorKind::ServerError
    } else if matches!(status_code, Some(code) if (400..500).contains(&code)) {
        ErrorKind::ClientError
    } else if matches!(error, ProviderError::Message(_)) {
        ErrorKind::UnknownError
    } else {
        ErrorKind::RuntimeError
    };

    ErrorMeta {
        message,
        status_code,
        kind,
        retryable,
        rate_limited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_from_direct_status() {
        let meta = classify(&ProviderError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        });
        assert_eq!(meta.status_code, Some(429));
        assert!(meta.rate_limited);
        assert!(meta.retryable);
        assert_eq!(meta.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn test_rate_limit_from_message_substring() {
        let meta = classify(&ProviderError::Message(
            "429 Too Many Requests".to_string(),
        ));
        assert!(meta.rate_limited);
        assert!(meta.retryable);
        assert_eq!(meta.kind, ErrorKind::RateLimit);
        assert_eq!(meta.status_code, Some(429));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for code in [500u16, 502, 503, 599] {
            let meta = classify(&ProviderError::Http {
                status: code,
                message: "upstream".to_string(),
            });
            assert!(meta.retryable, "expected {code} retryable");
            assert!(!meta.rate_limited);
            assert_eq!(meta.kind, ErrorKind::ServerError);
        }
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        for code in [400u16, 401, 403, 404, 428, 430, 499] {
            let meta = classify(&ProviderError::Http {
                status: code,
                message: "bad request".to_string(),
            });
            assert!(!meta.retryable, "expected {code} not retryable");
            assert!(!meta.rate_limited);
            assert_eq!(meta.kind, ErrorKind::ClientError);
        }
    }

    #[test]
    fn test_nested_api_code_wins_over_message() {
        let meta = classify(&ProviderError::Api {
            code: Some(503),
            message: "overloaded, try again in 404 seconds".to_string(),
            status: Some("UNAVAILABLE".to_string()),
        });
        assert_eq!(meta.status_code, Some(503));
        assert_eq!(meta.kind, ErrorKind::ServerError);
    }

    #[test]
    fn test_status_embedded_in_message() {
        let meta = classify(&ProviderError::api("got 503 from upstream"));
        assert_eq!(meta.status_code, Some(503));
        assert_eq!(meta.kind, ErrorKind::ServerError);

        // 4-digit numbers are not status codes.
        let meta = classify(&ProviderError::api("request id 5031 failed"));
        assert_eq!(meta.status_code, None);
    }

    #[test]
    fn test_typed_failure_falls_back_to_message_scan() {
        let meta = classify(&ProviderError::EmptyResponse(
            "upstream answered 503 with no candidates".to_string(),
        ));
        assert_eq!(meta.status_code, Some(503));
        assert_eq!(meta.kind, ErrorKind::ServerError);
        assert!(meta.retryable);
    }

    #[test]
    fn test_typed_failure_without_code_is_runtime_error() {
        let meta = classify(&ProviderError::EmptyResponse(
            "no candidates".to_string(),
        ));
        assert_eq!(meta.kind, ErrorKind::RuntimeError);
        assert!(!meta.retryable);
        assert_eq!(meta.status_code, None);
    }

    #[test]
    fn test_bare_message_is_unknown() {
        let meta = classify(&ProviderError::Message("something odd".to_string()));
        assert_eq!(meta.kind, ErrorKind::UnknownError);
        assert!(!meta.retryable);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate_limit");
        assert_eq!(ErrorKind::ServerError.as_str(), "server_error");
        assert_eq!(ErrorKind::ClientError.as_str(), "client_error");
        assert_eq!(ErrorKind::RuntimeError.as_str(), "runtime_error");
        assert_eq!(ErrorKind::UnknownError.as_str(), "unknown_error");
    }
}
