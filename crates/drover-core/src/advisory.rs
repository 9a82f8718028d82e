use async_trait::async_trait;

use crate::errors::AdvisoryError;

/// One bounded request to the advisory completion service.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    /// Ask the service to constrain its output to a JSON object.
    pub json_object: bool,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            json_object: false,
        }
    }

    pub fn json(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            json_object: true,
        }
    }
}

/// Trait implemented by each completion backend (OpenAI-compatible HTTP, mock).
#[async_trait]
pub trait Advisory: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Return the raw completion text. Rate limiting must surface as
    /// [`AdvisoryError::RateLimited`] so callers can trip the breaker.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AdvisoryError>;
}
