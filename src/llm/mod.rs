// Model invocation boundary
//
// The pipeline talks to the model through the `ChatClient` trait so the
// orchestrator can be tested with a scripted client. The only production
// implementation speaks the OpenAI-compatible chat-completions protocol.

pub mod openai;

use async_trait::async_trait;

use crate::config::{ApiConfig, ModelConfig};
use crate::error::Result;
use crate::stats::UsageStats;

/// One role-tagged message of a chat request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Final text plus usage for one model call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub usage: UsageStats,
}

/// Callback receiving each streamed text delta. Must only append to a
/// display buffer; pipeline state is mutated after the call returns.
pub type DeltaSink = dyn Fn(&str) + Send + Sync;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Blocking call: full response text and usage.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;

    /// Streaming call: `on_delta` is invoked synchronously per text chunk;
    /// the aggregated text and usage are still returned in full.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        on_delta: &DeltaSink,
    ) -> Result<ChatResponse>;
}

/// Factory for creating chat clients per model block.
pub struct ClientFactory;

impl ClientFactory {
    pub fn create(api: &ApiConfig, model: &ModelConfig) -> Result<Box<dyn ChatClient>> {
        Ok(Box::new(openai::OpenAiClient::new(api, model.clone())?))
    }
}

/// One trivial round trip to verify connectivity and credentials.
pub async fn test_connection(client: &dyn ChatClient) -> bool {
    let messages = [ChatMessage::user("Reply with just 'OK'")];
    match client.complete(&messages).await {
        Ok(response) => response.text.to_lowercase().contains("ok"),
        Err(e) => {
            tracing::warn!("API connection test failed: {}", e);
            false
        }
    }
}
