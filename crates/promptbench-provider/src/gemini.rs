//! Gemini REST client.
//!
//! Implements [`GenerationProvider`] over the `generateContent` endpoint of
//! the Google Generative Language API. Error bodies are decoded into
//! [`ProviderError::Api`] so the classifier sees the nested error code; a
//! non-success response without a parseable body falls back to
//! [`ProviderError::Http`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{GenerateRequest, GenerateResponse, GenerationProvider, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for the Gemini client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent as a query parameter.
    pub api_key: String,
    /// Base URL, overridable for testing against a local stub.
    pub base_url: String,
}

impl GeminiConfig {
    /// Create a configuration with the production base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Gemini generation provider.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a provider from configuration.
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        )
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerateRequest) -> ProviderResult<GenerateResponse> {
        let body = WireRequest::from(request);
        let response = self
            .client
            .post(self.endpoint(&request.model))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        debug!(model = %request.model, status = status.as_u16(), "generateContent response");
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error_body(status.as_u16(), &text));
        }

        let wire: WireResponse = response.json().await?;
        parse_response(wire)
    }
}

/// Map a non-success response to a provider error, preferring the nested
/// API error body when it decodes.
fn parse_error_body(status: u16, body: &str) -> ProviderError {
    if let Ok(envelope) = serde_json::from_str::<WireErrorEnvelope>(body) {
        return ProviderError::Api {
            code: envelope.error.code,
            message: envelope.error.message,
            status: envelope.error.status,
        };
    }
    ProviderError::Http {
        status,
        message: if body.is_empty() {
            "empty error body".to_string()
        } else {
            body.to_string()
        },
    }
}

/// Pull text and usage out of a decoded response.
fn parse_response(wire: WireResponse) -> ProviderResult<GenerateResponse> {
    let candidate = wire
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::EmptyResponse("no candidates".to_string()))?;

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse("no text parts".to_string()));
    }

    let usage = wire
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(GenerateResponse { text, usage })
}

// Wire format types below mirror the REST API field names.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    generation_config: WireGenerationConfig,
}

impl From<&GenerateRequest> for WireRequest {
    fn from(request: &GenerateRequest) -> Self {
        Self {
            contents: vec![WireContent::text(&request.prompt)],
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(WireContent::text),
            generation_config: WireGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    parts: Vec<WirePart>,
}

impl WireContent {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![WirePart {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: WireContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}
