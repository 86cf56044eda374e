// Chat-completions client for any OpenAI-compatible endpoint
// (OpenRouter, vLLM, Ollama, llama.cpp server, ...).
//
// Request:  POST {base_url}/chat/completions
//           {model, messages, temperature, max_tokens, stream: false}
// Response: {choices: [{message: {content: "..."}}]}

use crate::core::ai::{AiConfig, AiError, AiMessage, AiProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_payload(messages: &[AiMessage], config: &AiConfig) -> Value {
        json!({
            "model": config.model,
            "messages": messages,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "stream": false,
        })
    }

    fn extract_content(body: &Value) -> Result<String, AiError> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AiError::InvalidResponse("missing choices[0].message.content".into()))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> AiError {
        if err.is_timeout() {
            AiError::Timeout(self.timeout)
        } else {
            AiError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl AiProvider for ChatCompletionsClient {
    async fn chat_complete(
        &self,
        messages: &[AiMessage],
        config: &AiConfig,
    ) -> Result<String, AiError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&Self::build_payload(messages, config));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let content = Self::extract_content(&body)?;
        tracing::debug!(model = %config.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
