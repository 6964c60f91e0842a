//! Per-invocation agent state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::ConversationState;
use crate::llm::ChatMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentType {
    Main,
    Followup,
    Fallback,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::Followup => "followup",
            AgentType::Fallback => "fallback",
        }
    }
}

/// Moderation verdict parsed from the moderation LLM's JSON reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub is_safe: bool,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ModerationVerdict {
    /// Default-safe verdict used when moderation itself fails; the reason
    /// records why so the decision can be audited later.
    pub fn default_safe(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            violations: Vec::new(),
            confidence,
            reason: Some(reason.into()),
        }
    }
}

/// Everything one graph execution reads and writes. Lives only for the
/// duration of the run.
#[derive(Clone, Debug)]
pub struct AgentState {
    pub messages: Vec<ChatMessage>,
    pub tenant_id: String,
    pub customer_id: String,
    pub conversation_id: String,
    pub customer_context: Value,
    pub conversation_state: ConversationState,
    pub context: Map<String, Value>,
    pub intent: String,
    pub available_tools: Vec<String>,
    pub tool_results: Map<String, Value>,
    pub tools_used: Vec<String>,
    pub final_response: Option<String>,
    pub needs_clarification: bool,
    pub error: Option<String>,
    pub moderation: Option<ModerationVerdict>,
    pub agent_type: AgentType,
    /// Set when the main/followup path hit an open circuit, so fallback can
    /// answer with the "temporarily unavailable" text instead of probing a
    /// provider that is known to be down.
    pub circuit_open: bool,
    pub tokens_used: u32,
}

impl AgentState {
    pub fn new(
        tenant_id: &str,
        customer_id: &str,
        conversation_id: &str,
        conversation_state: ConversationState,
        customer_context: Value,
        context: Map<String, Value>,
        messages: Vec<ChatMessage>,
        available_tools: Vec<String>,
    ) -> Self {
        Self {
            messages,
            tenant_id: tenant_id.to_string(),
            customer_id: customer_id.to_string(),
            conversation_id: conversation_id.to_string(),
            customer_context,
            conversation_state,
            context,
            intent: "general".to_string(),
            available_tools,
            tool_results: Map::new(),
            tools_used: Vec::new(),
            final_response: None,
            needs_clarification: false,
            error: None,
            moderation: None,
            agent_type: AgentType::Main,
            circuit_open: false,
            tokens_used: 0,
        }
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| m.user_content())
    }
}
