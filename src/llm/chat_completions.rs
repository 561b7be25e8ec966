use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::LlmClient;
use crate::config::LlmConfig;
use crate::error::Error;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct ChatCompletionsClient {
    client: Client,
    config: LlmConfig,
}

impl ChatCompletionsClient {
    pub fn new(client: Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String, Error> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = context {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending completion request to {}", self.config.model);

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Llm(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Completion endpoint returned {}", status);
            return Err(Error::Llm(format!("Completion endpoint returned {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("Invalid completion response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(Error::Llm(format!("Empty completion from {}", self.config.model)));
        }

        Ok(text)
    }
}
