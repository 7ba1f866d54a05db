//! Generation provider trait and request/response types.
//!
//! [`GenerationProvider`] is the seam between the batch engine and any
//! concrete LLM API. The engine only ever sees this trait; the Gemini REST
//! client in [`crate::gemini`] is one implementation, test mocks are
//! another.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// A single generation request: one compiled prompt plus model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Compiled prompt text.
    pub prompt: String,

    /// Model identifier (e.g. "gemini-1.5-flash").
    pub model: String,

    /// Optional system instruction prepended by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Maximum output tokens.
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    /// Create a request with the default generation settings
    /// (temperature 0.7, 1024 output tokens).
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            system_instruction: None,
            temperature: 0.7,
            max_output_tokens: 1024,
        }
    }

    /// Set the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the output token limit.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Token accounting for one call or one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens produced by the model.
    pub completion_tokens: u64,
    /// Provider-reported total (prompt + completion + any overhead).
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record; total defaults to the sum of the parts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Successful generation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Token accounting for the call.
    pub usage: TokenUsage,
}

/// Trait for generation providers.
///
/// Implementations MUST surface throttling and server failures as
/// [`crate::ProviderError`] values the classifier can parse (status codes
/// in the error itself or embedded in the message).
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Run one generation call.
    async fn generate(&self, request: &GenerateRequest) -> ProviderResult<GenerateResponse>;
}
