//! Breaker-guarded model client.
//!
//! Every external model call flows through [`ModelClient::call`]: admission
//! first, then the request under a hard timeout, then a token-usage row and a
//! breaker release -- on success and on failure alike. Nothing else in the
//! system may talk to the vendor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use am_core::types::{CallType, DenyReason, TokenUsageRecord};
use am_harness::TokenBreaker;
use am_store::Store;

use crate::llm::{LlmConfig, LlmError, LlmMessage, LlmProvider};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The breaker refused admission; the deny event is already recorded.
    #[error("breaker blocked: {reason}")]
    BreakerBlocked { reason: DenyReason },

    /// Timeout, 5xx, network failure, or an unparseable response.
    #[error("model call failed: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

// ---------------------------------------------------------------------------
// Call options and output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub task_id: Uuid,
    pub feedback_id: String,
    pub call_type: CallType,
}

#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ModelOutput {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ---------------------------------------------------------------------------
// ModelClient
// ---------------------------------------------------------------------------

/// The only path to the external model. Cheap to clone.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn LlmProvider>,
    breaker: TokenBreaker,
    store: Store,
    model: String,
    timeout: Duration,
}

impl ModelClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        breaker: TokenBreaker,
        store: Store,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            breaker,
            store,
            model: model.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Issue one model call on behalf of `opts.task_id`.
    ///
    /// `opts.max_tokens` doubles as the breaker's token estimate; the
    /// reservation is reconciled to actual usage on release.
    pub async fn call(&self, messages: &[LlmMessage], opts: &CallOptions) -> Result<ModelOutput> {
        let action = opts.call_type.to_string();
        let admission = self
            .breaker
            .check("llm", &action, opts.max_tokens as u64, Some(opts.task_id))
            .await;
        if !admission.allowed {
            let reason = admission.reason.unwrap_or(DenyReason::CircuitOpen);
            warn!(task_id = %opts.task_id, %reason, "model call blocked by breaker");
            return Err(ModelError::BreakerBlocked { reason });
        }

        let config = LlmConfig {
            model: self.model.clone(),
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
        };

        let outcome = tokio::time::timeout(self.timeout, self.provider.complete(messages, &config))
            .await
            .unwrap_or(Err(LlmError::Timeout));

        match outcome {
            Ok(resp) => {
                let actual = resp.input_tokens + resp.output_tokens;
                self.store.append_token_usage(TokenUsageRecord {
                    id: Uuid::new_v4(),
                    task_id: opts.task_id,
                    feedback_id: opts.feedback_id.clone(),
                    model: resp.model.clone(),
                    prompt_tokens: resp.input_tokens,
                    completion_tokens: resp.output_tokens,
                    call_type: opts.call_type,
                    timestamp: chrono::Utc::now(),
                    success: true,
                    error: None,
                });
                self.breaker.release(opts.task_id, actual, true).await;
                debug!(
                    task_id = %opts.task_id,
                    call_type = %opts.call_type,
                    tokens = actual,
                    "model call completed"
                );
                Ok(ModelOutput {
                    content: resp.content,
                    prompt_tokens: resp.input_tokens,
                    completion_tokens: resp.output_tokens,
                })
            }
            Err(e) => {
                self.store.append_token_usage(TokenUsageRecord {
                    id: Uuid::new_v4(),
                    task_id: opts.task_id,
                    feedback_id: opts.feedback_id.clone(),
                    model: self.model.clone(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    call_type: opts.call_type,
                    timestamp: chrono::Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                });
                self.breaker.release(opts.task_id, 0, false).await;
                warn!(task_id = %opts.task_id, error = %e, "model call failed");
                Err(ModelError::Transient(e.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
