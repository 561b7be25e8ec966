use async_trait::async_trait;

use crate::error::Error;

pub mod chat_completions;

pub use chat_completions::ChatCompletionsClient;

/// Text completion collaborator shared by the summary composer and the
/// conversation manager.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt`, optionally steered by a system `context`
    async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String, Error>;
}
