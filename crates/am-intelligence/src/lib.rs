//! LLM access layer for auto-mend.
//!
//! [`llm`] defines the provider abstraction (Anthropic Messages API plus a
//! scriptable mock); [`client`] wraps a provider with breaker admission,
//! token-usage accounting, and a hard call timeout. The client is the only
//! path to the external model.

pub mod client;
pub mod llm;

pub use client::{CallOptions, ModelClient, ModelError, ModelOutput};
pub use llm::{
    AnthropicProvider, LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, MockProvider,
};
