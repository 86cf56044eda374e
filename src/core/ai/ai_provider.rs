use super::models::{AiConfig, AiMessage};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to a completion endpoint. All of them are worth retrying
/// later; none of them say anything about the text being classified.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Sends a chat completion request and returns the raw text of the first choice.
    async fn chat_complete(
        &self,
        messages: &[AiMessage],
        config: &AiConfig,
    ) -> Result<String, AiError>;
}

// Blanket implementation for Box<dyn AiProvider> so the worker can hold a
// trait object and tests can swap in a stub provider.
#[async_trait]
impl AiProvider for Box<dyn AiProvider> {
    async fn chat_complete(
        &self,
        messages: &[AiMessage],
        config: &AiConfig,
    ) -> Result<String, AiError> {
        (**self).chat_complete(messages, config).await
    }
}
