//! Error types for the provider crate.
//!
//! Provider failures come in several shapes: an HTTP status on the response
//! itself, a structured error body nested inside the API payload, a typed
//! transport failure, or nothing but a message string. [`ProviderError`]
//! models each shape as a distinct variant so the classifier can extract a
//! status code with a fixed precedence instead of probing dynamic fields.

use thiserror::Error;

/// Errors that can occur when calling a generation provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The HTTP layer returned a non-success status directly.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The API returned a structured error body with a nested code.
    #[error("API error: {message}")]
    Api {
        code: Option<u16>,
        message: String,
        /// Provider-specific status label (e.g. "RESOURCE_EXHAUSTED").
        status: Option<String>,
    },

    /// Network/transport failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response carried no candidates or no text parts.
    #[error("Empty response: {0}")]
    EmptyResponse(String),

    /// A bare error message with no further structure.
    #[error("{0}")]
    Message(String),
}

impl ProviderError {
    /// Construct an API error without a nested code.
    pub fn api(message: impl Into<String>) -> Self {
        ProviderError::Api {
            code: None,
            message: message.into(),
            status: None,
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");

        let err = ProviderError::api("quota exceeded");
        assert_eq!(err.to_string(), "API error: quota exceeded");

        let err = ProviderError::Message("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }
}
