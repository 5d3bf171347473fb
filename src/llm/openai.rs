use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatClient, ChatMessage, ChatResponse, DeltaSink};
use crate::config::{ApiConfig, ModelConfig, resolve_credentials};
use crate::error::{RefineError, Result};
use crate::stats::UsageStats;

/// OpenAI-compatible chat-completions client for one configured model.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: ModelConfig,
    max_retries: u32,
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    /// Request timed out; retry with backoff.
    Timeout,
    /// 5xx-equivalent server error; retry with backoff.
    Server,
    /// Everything else propagates immediately.
    Fatal,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u64>,
}

impl From<ApiUsage> for UsageStats {
    fn from(usage: ApiUsage) -> Self {
        UsageStats {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens)
                .unwrap_or(0),
            total_tokens: usage.total_tokens,
        }
    }
}

/// Exponential backoff: 2^attempt seconds.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

fn classify_status(status: StatusCode) -> FailureClass {
    if status.is_server_error() {
        FailureClass::Server
    } else {
        FailureClass::Fatal
    }
}

fn classify_request_error(error: &reqwest::Error) -> FailureClass {
    if error.is_timeout() {
        FailureClass::Timeout
    } else {
        FailureClass::Fatal
    }
}

impl OpenAiClient {
    pub fn new(api: &ApiConfig, model: ModelConfig) -> Result<Self> {
        let credentials = resolve_credentials(api, &model)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| RefineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: credentials.base_url,
            api_key: credentials.api_key,
            model,
            max_retries: api.max_retries.max(1),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model.name,
            "messages": messages,
            "max_completion_tokens": self.model.max_output_tokens,
        });

        // Reasoning effort is only understood by the gpt-5 family.
        if let Some(effort) = &self.model.reasoning_effort {
            if self.model.name.to_lowercase().starts_with("gpt-5") {
                body["reasoning_effort"] = json!(effort);
            }
        }
        if let Some(temperature) = self.model.temperature {
            body["temperature"] = json!(temperature);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    /// Run one request attempt, classifying failures for the retry loop.
    async fn send_request(&self, body: &Value) -> std::result::Result<reqwest::Response, (FailureClass, String)> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| (classify_request_error(&e), format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let class = classify_status(status);
            let text = response.text().await.unwrap_or_default();
            return Err((class, format!("API error {}: {}", status, text)));
        }

        Ok(response)
    }

    /// Retry wrapper: transient failures back off 2^attempt seconds, up to
    /// the configured attempt count; fatal failures propagate immediately.
    async fn with_retries<F, Fut>(&self, mut attempt_fn: F) -> Result<ChatResponse>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<ChatResponse, (FailureClass, String)>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(response) => return Ok(response),
                Err((FailureClass::Fatal, message)) => {
                    return Err(RefineError::Invocation(message));
                }
                Err((class, message)) => {
                    if attempt + 1 >= self.max_retries {
                        return Err(RefineError::Invocation(format!(
                            "{} after {} attempts: {}",
                            match class {
                                FailureClass::Timeout => "API request timed out",
                                _ => "API request failed",
                            },
                            self.max_retries,
                            message
                        )));
                    }

                    let wait = backoff_delay(attempt);
                    warn!(
                        "{} Retrying in {}s... (attempt {}/{})",
                        message,
                        wait.as_secs(),
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_complete(&self, body: &Value) -> std::result::Result<ChatResponse, (FailureClass, String)> {
        let response = self.send_request(body).await?;

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| (FailureClass::Fatal, format!("Failed to parse API response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or((FailureClass::Fatal, "No choices in API response".to_string()))?;

        let text = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or((FailureClass::Fatal, "Response content is empty".to_string()))?;

        Ok(ChatResponse {
            text,
            usage: completion.usage.map(UsageStats::from).unwrap_or_default(),
        })
    }

    async fn attempt_streaming(
        &self,
        body: &Value,
        on_delta: &DeltaSink,
    ) -> std::result::Result<ChatResponse, (FailureClass, String)> {
        let mut response = self.send_request(body).await?;

        let mut full_text = String::new();
        let mut usage = UsageStats::default();
        let mut buffer = String::new();

        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| (classify_request_error(&e), format!("Stream read failed: {}", e)))?;

            let Some(bytes) = chunk else { break };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE events are newline-delimited; hold back any partial line.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(parsed) => {
                        if let Some(choice) = parsed.choices.first() {
                            if let Some(content) = &choice.delta.content {
                                full_text.push_str(content);
                                on_delta(content);
                            }
                        }
                        if let Some(api_usage) = parsed.usage {
                            usage = api_usage.into();
                        }
                    }
                    Err(e) => debug!("Skipping unparseable stream event: {}", e),
                }
            }
        }

        if full_text.is_empty() {
            return Err((
                FailureClass::Fatal,
                "No content received from streaming API".to_string(),
            ));
        }

        Ok(ChatResponse {
            text: full_text,
            usage,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let body = self.build_body(messages, false);
        self.with_retries(|| self.attempt_complete(&body)).await
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        on_delta: &DeltaSink,
    ) -> Result<ChatResponse> {
        let body = self.build_body(messages, true);
        self.with_retries(|| self.attempt_streaming(&body, on_delta))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            FailureClass::Server
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            FailureClass::Server
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureClass::Fatal);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), FailureClass::Fatal);
    }

    #[test]
    fn test_reasoning_effort_only_for_gpt5_models() {
        let api = test_api_config();
        let mut model = crate::config::Config::default().main_model;
        model.name = "gpt-5-mini".to_string();
        model.reasoning_effort = Some("low".to_string());
        model.key_file = Some(api_key_file());

        let client = OpenAiClient::new(&api, model).unwrap();
        let body = client.build_body(&[ChatMessage::user("hi")], false);
        assert_eq!(body["reasoning_effort"], "low");

        let mut other = crate::config::Config::default().terminology_model;
        other.name = "gpt-4o-mini".to_string();
        other.reasoning_effort = Some("low".to_string());
        other.key_file = Some(api_key_file());

        let client = OpenAiClient::new(&api, other).unwrap();
        let body = client.build_body(&[ChatMessage::user("hi")], false);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_streaming_body_requests_usage() {
        let api = test_api_config();
        let mut model = crate::config::Config::default().main_model;
        model.key_file = Some(api_key_file());

        let client = OpenAiClient::new(&api, model).unwrap();
        let body = client.build_body(&[ChatMessage::user("hi")], true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_usage_mapping_includes_reasoning_tokens() {
        let api_usage: ApiUsage = serde_json::from_value(json!({
            "prompt_tokens": 100,
            "completion_tokens": 40,
            "total_tokens": 140,
            "completion_tokens_details": {"reasoning_tokens": 25}
        }))
        .unwrap();

        let usage: UsageStats = api_usage.into();
        assert_eq!(usage.reasoning_tokens, 25);
        assert_eq!(usage.total_tokens, 140);
    }

    fn api_key_file() -> std::path::PathBuf {
        use std::io::Write;
        use std::sync::OnceLock;

        static KEY_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
        let dir = KEY_DIR.get_or_init(|| tempfile::tempdir().unwrap());
        let path = dir.path().join("key");
        if !path.exists() {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "test-key").unwrap();
        }
        path
    }

    fn test_api_config() -> ApiConfig {
        ApiConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            key_file: api_key_file().to_string_lossy().to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}
