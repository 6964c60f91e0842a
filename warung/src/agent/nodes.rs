//! Node helpers: moderation verdict parsing, routing, prompt assembly.

use serde_json::Value;

use crate::tools::ToolSpec;

use super::state::{AgentState, AgentType, ModerationVerdict};

/// Categories the moderation prompt asks about.
pub const MODERATION_CATEGORIES: [&str; 6] = [
    "harassment",
    "hate",
    "self_harm",
    "sexual",
    "violence",
    "spam",
];

/// Openings that signal a follow-up to the previous topic.
const FOLLOWUP_CUES: [&str; 9] = [
    "what about",
    "can you explain",
    "tell me more",
    "and then",
    "what else",
    "continue",
    "go on",
    "more details",
    "elaborate",
];

pub fn moderation_prompt(user_message: &str) -> String {
    format!(
        "Analyze the following message for content policy violations.\n\
         Check for: {}.\n\n\
         Message to analyze: \"{user_message}\"\n\n\
         Respond in JSON format with:\n\
         {{\n\
             \"is_safe\": true/false,\n\
             \"violations\": [\"list of violation categories if any\"],\n\
             \"confidence\": 0.0-1.0,\n\
             \"reason\": \"brief explanation if not safe\"\n\
         }}",
        MODERATION_CATEGORIES.join(", ")
    )
}

/// Parse the first `{…}` substring of the reply as a verdict. A reply that
/// cannot be parsed is treated as safe with confidence 0.5; blocking real
/// customers on a malformed moderation reply is the wrong trade.
pub fn parse_verdict(reply: &str) -> ModerationVerdict {
    let open = match reply.find('{') {
        Some(i) => i,
        None => return ModerationVerdict::default_safe(0.5, "unable to parse"),
    };
    let close = match reply[open..].find('}') {
        Some(i) => open + i + 1,
        None => return ModerationVerdict::default_safe(0.5, "unable to parse"),
    };
    serde_json::from_str::<ModerationVerdict>(&reply[open..close])
        .unwrap_or_else(|_| ModerationVerdict::default_safe(0.5, "unable to parse"))
}

/// Pure routing function: moderation violations go to fallback, follow-up
/// cues (or an explicit context flag) go to the followup agent, everything
/// else to main.
pub fn route(state: &AgentState) -> AgentType {
    if let Some(verdict) = &state.moderation {
        if !verdict.is_safe {
            return AgentType::Fallback;
        }
    }

    if state
        .context
        .get("is_followup")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return AgentType::Followup;
    }

    if let Some(last) = state.last_user_message() {
        let last = last.to_lowercase();
        if FOLLOWUP_CUES.iter().any(|cue| last.starts_with(cue)) {
            return AgentType::Followup;
        }
    }

    AgentType::Main
}

/// Context block appended to the tenant's system prompt.
pub fn build_context_info(state: &AgentState, specs: &[ToolSpec]) -> String {
    let mut parts = vec![
        format!("Conversation ID: {}", state.conversation_id),
        format!("Current State: {}", state.conversation_state.as_str()),
    ];

    let ctx = &state.customer_context;
    if let Some(name) = ctx.get("name").and_then(Value::as_str) {
        parts.push(format!("Customer Name: {name}"));
    }
    if let Some(total) = ctx.get("total_orders").and_then(Value::as_i64) {
        if total > 0 {
            parts.push(format!("Total Orders: {total}"));
        }
    }
    if ctx.get("is_vip").and_then(Value::as_bool).unwrap_or(false) {
        parts.push("Customer is VIP".to_string());
    }

    if !specs.is_empty() {
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        parts.push(format!("Available Tools: {}", names.join(", ")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConversationState;
    use crate::llm::ChatMessage;
    use serde_json::{json, Map};

    fn state_with(messages: Vec<ChatMessage>) -> AgentState {
        AgentState::new(
            "t1",
            "c1",
            "conv",
            ConversationState::Browsing,
            json!({}),
            Map::new(),
            messages,
            vec![],
        )
    }

    #[test]
    fn verdict_parsed_from_prose_wrapper() {
        let reply = r#"Here is my analysis: {"is_safe": false, "violations": ["spam"], "confidence": 0.9, "reason": "bulk ads"} hope that helps"#;
        let v = parse_verdict(reply);
        assert!(!v.is_safe);
        assert_eq!(v.violations, vec!["spam"]);
        assert!((v.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unparseable_reply_defaults_safe() {
        let v = parse_verdict("I think this message is fine");
        assert!(v.is_safe);
        assert!((v.confidence - 0.5).abs() < 1e-9);
        assert_eq!(v.reason.as_deref(), Some("unable to parse"));

        let v = parse_verdict("{not json at all");
        assert!(v.is_safe);
    }

    #[test]
    fn unsafe_verdict_routes_to_fallback() {
        let mut state = state_with(vec![ChatMessage::user("spam spam spam")]);
        state.moderation = Some(ModerationVerdict {
            is_safe: false,
            violations: vec!["spam".into()],
            confidence: 1.0,
            reason: None,
        });
        assert_eq!(route(&state), AgentType::Fallback);
    }

    #[test]
    fn followup_cue_routes_to_followup() {
        for cue in ["tell me more about shipping", "What about the red one?", "continue"] {
            let state = state_with(vec![ChatMessage::user(cue)]);
            assert_eq!(route(&state), AgentType::Followup, "cue: {cue}");
        }
    }

    #[test]
    fn followup_context_flag_wins() {
        let mut state = state_with(vec![ChatMessage::user("berapa harganya?")]);
        state.context.insert("is_followup".into(), json!(true));
        assert_eq!(route(&state), AgentType::Followup);
    }

    #[test]
    fn default_routes_to_main() {
        let state = state_with(vec![ChatMessage::user("Halo, saya mau order")]);
        assert_eq!(route(&state), AgentType::Main);
    }

    /// **Scenario**: a cue mid-sentence is not a follow-up; cues anchor to
    /// the start of the message.
    #[test]
    fn cue_mid_sentence_is_not_followup() {
        let state = state_with(vec![ChatMessage::user(
            "I want to know more details maybe later",
        )]);
        assert_eq!(route(&state), AgentType::Main);
    }

    #[test]
    fn context_info_includes_customer_and_tools() {
        let mut state = state_with(vec![]);
        state.customer_context = json!({
            "name": "Budi",
            "total_orders": 7,
            "is_vip": true,
        });
        let specs = vec![ToolSpec {
            name: "search_products".into(),
            description: "d".into(),
            input_schema: json!({}),
        }];
        let info = build_context_info(&state, &specs);
        assert!(info.contains("Conversation ID: conv"));
        assert!(info.contains("Current State: browsing"));
        assert!(info.contains("Customer Name: Budi"));
        assert!(info.contains("Total Orders: 7"));
        assert!(info.contains("Customer is VIP"));
        assert!(info.contains("Available Tools: search_products"));
    }
}
