//! Generative model abstractions and implementations.
//!
//! Handlers obtain a [`TextProvider`] per request through a [`ModelClientFactory`],
//! so the Gemini backend can be swapped for the mock in tests.

pub mod gemini;
pub mod mock;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Model service unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Whether the same call could plausibly succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited
                | ProviderError::Unavailable(_)
                | ProviderError::NetworkError(_)
        )
    }
}

/// One part of a multimodal prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// Base64-encoded binary payload.
    InlineData { mime_type: String, data: String },
}

/// Generation parameters for model requests.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Temperature (0.0 - 2.0).
    pub temperature: Option<f32>,

    /// Maximum output tokens.
    pub max_tokens: Option<i32>,
}

/// Result of a provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub finish_reason: FinishReason,
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Complete,
    Length,
    ContentFilter,
}

impl FinishReason {
    pub fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Complete,
        }
    }
}

/// Trait for text generation providers (e.g., Gemini).
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Send the prompt parts as a single user turn and return the reply text.
    async fn generate(
        &self,
        parts: &[PromptPart],
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

/// Produces a ready-to-use provider for one request.
#[async_trait]
pub trait ModelClientFactory: Send + Sync {
    async fn init(&self) -> Result<Arc<dyn TextProvider>, ProviderError>;
}
