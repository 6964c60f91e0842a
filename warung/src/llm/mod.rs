//! LLM client abstraction for the agent nodes.
//!
//! The nodes depend on a callable that takes chat messages plus the tool
//! specs exposed for the current conversation state and returns assistant
//! text with optional tool calls; this module defines the trait, the real
//! OpenAI-compatible implementation and a mock for tests.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::tools::ToolSpec;

/// One chat turn as the agent sees it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool execution, tagged with the originating call id.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Text of the last user turn, if this is one.
    pub fn user_content(&self) -> Option<&str> {
        match self {
            ChatMessage::User(s) => Some(s),
            _ => None,
        }
    }
}

/// A single tool invocation requested by the LLM. Arguments are the raw JSON
/// string from the provider; the dispatch loop parses and enriches them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Token usage for one LLM call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from one completion: assistant text plus any tool calls.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// LLM client: messages in, assistant text and tool calls out.
///
/// Implementations: [`ChatOpenAI`] (OpenAI-compatible chat completions) and
/// [`MockLlm`] (scripted responses for tests).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError>;
}

/// Per-tenant LLM configuration, resolved by name from the repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub name: String,
    pub provider: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

impl LlmConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

/// Build a client for a configuration. Provider names are matched the way
/// the tenant records spell them; anything OpenAI-compatible goes through
/// [`ChatOpenAI`].
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "openai" | "openai-compatible" => Ok(Arc::new(ChatOpenAI::from_config(config)?)),
        other => Err(LlmError::Config(format!("unknown llm provider: {other}"))),
    }
}
