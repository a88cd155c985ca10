//! LLM provider abstraction.
//!
//! One async trait, one real provider (the Anthropic Messages API), and a
//! scriptable mock for tests. Streaming is deliberately absent -- progress
//! streaming to clients happens at the event-bus layer, not token by token
//! from the vendor.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LlmError {
    /// Connection-level failure (DNS, TLS, refused, reset).
    #[error("http error: {0}")]
    Http(String),

    /// Non-success status from the vendor.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected schema.
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP 429 from the vendor.
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmRole::System => write!(f, "system"),
            LlmRole::User => write!(f, "user"),
            LlmRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: String,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

/// Provider for the Anthropic Messages API (`x-api-key` auth).
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Override the base URL, for tests against a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the Messages API request body. System messages move to the
    /// top-level `system` field; everything else stays in `messages`.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> serde_json::Value {
        let mut system_text: Option<String> = None;
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter_map(|msg| {
                if msg.role == LlmRole::System {
                    match &mut system_text {
                        Some(s) => {
                            s.push('\n');
                            s.push_str(&msg.content);
                        }
                        None => system_text = Some(msg.content.clone()),
                    }
                    None
                } else {
                    Some(serde_json::json!({
                        "role": msg.role.to_string(),
                        "content": msg.content,
                    }))
                }
            })
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });
        if let Some(system) = system_text {
            body["system"] = serde_json::Value::String(system);
        }
        body
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    _type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: api_resp.model,
            input_tokens: api_resp.usage.input_tokens,
            output_tokens: api_resp.usage.output_tokens,
            finish_reason: api_resp.stop_reason.unwrap_or_else(|| "unknown".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Scriptable provider for tests. Pops queued responses in order; an empty
/// queue yields a default response so incidental calls never fail.
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    captured: Arc<Mutex<Vec<(Vec<LlmMessage>, LlmConfig)>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, response: LlmResponse) -> Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a plain-text success with the given token counts.
    pub fn with_text(self, content: impl Into<String>, input: u64, output: u64) -> Self {
        let content = content.into();
        self.with_response(LlmResponse {
            content,
            model: "mock-model".into(),
            input_tokens: input,
            output_tokens: output,
            finish_reason: "end_turn".into(),
        })
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Requests seen so far, for assertions.
    pub fn captured_requests(&self) -> Vec<(Vec<LlmMessage>, LlmConfig)> {
        self.captured.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        self.captured
            .lock()
            .unwrap()
            .push((messages.to_vec(), config.clone()));

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(LlmResponse {
                content: "{}".into(),
                model: config.model.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: "end_turn".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_moves_system_to_top_level() {
        let messages = vec![
            LlmMessage::system("Answer in JSON only"),
            LlmMessage::user("Classify this feedback"),
        ];
        let config = LlmConfig::default();
        let body = AnthropicProvider::build_request_body(&messages, &config);

        assert_eq!(body["system"], "Answer in JSON only");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn request_body_concatenates_multiple_system_messages() {
        let messages = vec![
            LlmMessage::system("first"),
            LlmMessage::system("second"),
            LlmMessage::user("hi"),
        ];
        let body = AnthropicProvider::build_request_body(&messages, &LlmConfig::default());
        let system = body["system"].as_str().unwrap();
        assert!(system.contains("first") && system.contains("second"));
    }

    #[tokio::test]
    async fn mock_pops_in_order_then_defaults() {
        let provider = MockProvider::new()
            .with_text("one", 1, 1)
            .with_text("two", 2, 2);
        let config = LlmConfig::default();

        let a = provider
            .complete(&[LlmMessage::user("x")], &config)
            .await
            .unwrap();
        let b = provider
            .complete(&[LlmMessage::user("x")], &config)
            .await
            .unwrap();
        let c = provider
            .complete(&[LlmMessage::user("x")], &config)
            .await
            .unwrap();
        assert_eq!(a.content, "one");
        assert_eq!(b.content, "two");
        assert_eq!(c.content, "{}");
    }

    #[tokio::test]
    async fn mock_yields_queued_error() {
        let provider = MockProvider::new().with_error(LlmError::Timeout);
        let result = provider
            .complete(&[LlmMessage::user("x")], &LlmConfig::default())
            .await;
        assert!(matches!(result, Err(LlmError::Timeout)));
    }

    #[tokio::test]
    async fn mock_captures_requests() {
        let provider = MockProvider::new();
        provider
            .complete(
                &[LlmMessage::system("s"), LlmMessage::user("u")],
                &LlmConfig::default(),
            )
            .await
            .unwrap();
        let captured = provider.captured_requests();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.len(), 2);
    }

    #[test]
    fn provider_is_object_safe() {
        let _: Box<dyn LlmProvider> = Box::new(MockProvider::new());
        let _: Box<dyn LlmProvider> = Box::new(AnthropicProvider::new("key"));
    }
}
