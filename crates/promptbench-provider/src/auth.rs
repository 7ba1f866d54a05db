//! API key resolution.
//!
//! A server-side key configured in the environment always wins over a key
//! supplied with an individual request; the per-request key is only a
//! fallback for deployments without a server credential.

/// Environment variable holding the server-side Gemini API key.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Resolves the effective API key for a scheduling request.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    env_var: String,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(API_KEY_ENV_VAR)
    }
}

impl CredentialResolver {
    /// Create a resolver reading the given environment variable.
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }

    /// Resolve the effective key: environment first, then the supplied key.
    ///
    /// Returns `None` when neither is available (a `missing_api_key`
    /// condition for the scheduler).
    pub fn resolve(&self, request_key: Option<&str>) -> Option<String> {
        if let Ok(key) = std::env::var(&self.env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
        request_key
            .filter(|k| !k.is_empty())
            .map(ToString::to_string)
    }
}
