//! Mock provider implementations for testing.

use super::{
    FinishReason, GenerationParams, ModelClientFactory, PromptPart, ProviderError,
    ProviderResponse, TextProvider,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the mock model answers with.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Every call fails with an API error.
    Error,
}

#[derive(Default)]
struct Recorded {
    init_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    last_parts: Mutex<Vec<PromptPart>>,
}

/// Factory handing out [`MockTextProvider`]s that share call counters.
pub struct MockModelFactory {
    init_fails: bool,
    reply: MockReply,
    recorded: Arc<Recorded>,
}

impl MockModelFactory {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            init_fails: false,
            reply: MockReply::Text(text.into()),
            recorded: Arc::default(),
        }
    }

    pub fn failing_calls() -> Self {
        Self {
            init_fails: false,
            reply: MockReply::Error,
            recorded: Arc::default(),
        }
    }

    pub fn failing_init() -> Self {
        Self {
            init_fails: true,
            reply: MockReply::Error,
            recorded: Arc::default(),
        }
    }

    pub fn init_calls(&self) -> usize {
        self.recorded.init_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.recorded.generate_calls.load(Ordering::SeqCst)
    }

    /// Prompt parts of the most recent `generate` call.
    pub fn last_parts(&self) -> Vec<PromptPart> {
        self.recorded
            .last_parts
            .lock()
            .map(|parts| parts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClientFactory for MockModelFactory {
    async fn init(&self) -> Result<Arc<dyn TextProvider>, ProviderError> {
        self.recorded.init_calls.fetch_add(1, Ordering::SeqCst);

        if self.init_fails {
            return Err(ProviderError::NotConfigured(
                "Mock model initialization disabled".to_string(),
            ));
        }

        Ok(Arc::new(MockTextProvider {
            reply: self.reply.clone(),
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

/// Mock text provider for testing.
pub struct MockTextProvider {
    reply: MockReply,
    recorded: Arc<Recorded>,
}

#[async_trait]
impl TextProvider for MockTextProvider {
    async fn generate(
        &self,
        parts: &[PromptPart],
        _params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        self.recorded.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.recorded.last_parts.lock() {
            *last = parts.to_vec();
        }

        match &self.reply {
            MockReply::Text(text) => Ok(ProviderResponse {
                text: text.clone(),
                input_tokens: 0,
                output_tokens: 10,
                finish_reason: FinishReason::Complete,
            }),
            MockReply::Error => Err(ProviderError::ApiError(
                "Mock model invocation failed".to_string(),
            )),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}
