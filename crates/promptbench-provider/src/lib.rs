//! Promptbench provider abstraction layer
//!
//! This crate provides a unified interface for calling generative-model
//! APIs from the batch engine, decoupling orchestration from any concrete
//! vendor SDK.
//!
//! # Overview
//!
//! - A common [`GenerationProvider`] trait for running one prompt
//! - [`GenerateRequest`]/[`GenerateResponse`] with [`TokenUsage`] accounting
//! - A failure taxonomy ([`ErrorMeta`], [`classify`]) that drives the
//!   engine's retry and pause policy
//! - [`CredentialResolver`] for API key resolution (environment first)
//! - A concrete Gemini REST client ([`GeminiProvider`])
//!
//! # Implementing a custom provider
//!
//! ```ignore
//! use promptbench_provider::{
//!     GenerateRequest, GenerateResponse, GenerationProvider, ProviderResult, TokenUsage,
//! };
//! use async_trait::async_trait;
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl GenerationProvider for MyProvider {
//!     fn name(&self) -> &str { "my_provider" }
//!
//!     async fn generate(&self, request: &GenerateRequest) -> ProviderResult<GenerateResponse> {
//!         Ok(GenerateResponse {
//!             text: format!("echo: {}", request.prompt),
//!             usage: TokenUsage::new(1, 1),
//!         })
//!     }
//! }
//! ```

pub mod auth;
pub mod classify;
pub mod error;
pub mod gemini;
pub mod provider;

pub use auth::{CredentialResolver, API_KEY_ENV_VAR};
pub use classify::{classify, ErrorKind, ErrorMeta};
pub use error::{ProviderError, ProviderResult};
pub use gemini::{GeminiConfig, GeminiProvider};
pub use provider::{GenerateRequest, GenerateResponse, GenerationProvider, TokenUsage};
