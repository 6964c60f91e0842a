//! Conversation hot state and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DomainError;

/// Messages kept in the cache per conversation.
pub const HISTORY_CAP: usize = 100;
/// Messages sent to the LLM per turn.
pub const LLM_HISTORY: usize = 20;

/// Where the customer is in the purchase funnel. Transitions are flexible
/// enough to let a customer change their mind (checkout back to ordering,
/// payment back to checkout after a failure); `completed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Greeting,
    Browsing,
    Ordering,
    Checkout,
    Payment,
    Support,
    Completed,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Greeting => "greeting",
            ConversationState::Browsing => "browsing",
            ConversationState::Ordering => "ordering",
            ConversationState::Checkout => "checkout",
            ConversationState::Payment => "payment",
            ConversationState::Support => "support",
            ConversationState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "greeting" => Some(Self::Greeting),
            "browsing" => Some(Self::Browsing),
            "ordering" => Some(Self::Ordering),
            "checkout" => Some(Self::Checkout),
            "payment" => Some(Self::Payment),
            "support" => Some(Self::Support),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        use ConversationState::*;
        let allowed: &[ConversationState] = match self {
            Greeting => &[Browsing, Support, Completed],
            Browsing => &[Ordering, Support, Completed],
            Ordering => &[Checkout, Browsing, Support, Completed],
            Checkout => &[Payment, Ordering, Browsing, Completed],
            Payment => &[Completed, Support, Checkout],
            Support => &[Greeting, Browsing, Completed],
            Completed => &[],
        };
        allowed.contains(&target)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub at: DateTime<Utc>,
}

/// Per-chat hot state held in the cache; expires after 24h of inactivity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub wa_chat_id: String,
    pub state: ConversationState,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub current_order_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(tenant_id: &str, customer_id: &str, wa_chat_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: wa_chat_id.to_string(),
            tenant_id: tenant_id.to_string(),
            customer_id: customer_id.to_string(),
            wa_chat_id: wa_chat_id.to_string(),
            state: ConversationState::Greeting,
            context: Map::new(),
            current_order_id: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, keeping at most [`HISTORY_CAP`] entries.
    pub fn push_message(&mut self, role: &str, content: &str, metadata: Value) {
        self.messages.push(ConversationMessage {
            role: role.to_string(),
            content: content.to_string(),
            metadata,
            at: Utc::now(),
        });
        if self.messages.len() > HISTORY_CAP {
            let excess = self.messages.len() - HISTORY_CAP;
            self.messages.drain(..excess);
        }
        self.updated_at = Utc::now();
    }

    /// The most recent messages, oldest first, bounded by [`LLM_HISTORY`].
    pub fn recent_messages(&self) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(LLM_HISTORY);
        &self.messages[start..]
    }

    /// Apply a state change if the transition is legal. Returns the previous
    /// state so the caller can publish a `conversation.state_changed` event.
    pub fn transition_to(
        &mut self,
        target: ConversationState,
    ) -> Result<ConversationState, DomainError> {
        if !self.state.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                entity: "conversation",
                from: self.state.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        let from = self.state;
        self.state = target;
        self.updated_at = Utc::now();
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn funnel_transitions() {
        use ConversationState::*;
        assert!(Greeting.can_transition_to(Browsing));
        assert!(Browsing.can_transition_to(Ordering));
        assert!(Ordering.can_transition_to(Checkout));
        assert!(Checkout.can_transition_to(Payment));
        assert!(Payment.can_transition_to(Completed));
        // Customers change their minds.
        assert!(Ordering.can_transition_to(Browsing));
        assert!(Checkout.can_transition_to(Ordering));
        assert!(Payment.can_transition_to(Checkout));
    }

    #[test]
    fn completed_is_terminal() {
        use ConversationState::*;
        for target in [Greeting, Browsing, Ordering, Checkout, Payment, Support] {
            assert!(!Completed.can_transition_to(target));
        }
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut convo = Conversation::new("t1", "c1", "628123@c.us");
        let err = convo.transition_to(ConversationState::Payment).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(convo.state, ConversationState::Greeting);
    }

    #[test]
    fn history_capped_at_limit() {
        let mut convo = Conversation::new("t1", "c1", "628123@c.us");
        for i in 0..(HISTORY_CAP + 25) {
            convo.push_message("user", &format!("msg {i}"), json!({}));
        }
        assert_eq!(convo.messages.len(), HISTORY_CAP);
        // Oldest messages were dropped, newest kept.
        assert_eq!(convo.messages.last().unwrap().content, "msg 124");
        assert_eq!(convo.messages.first().unwrap().content, "msg 25");
    }

    #[test]
    fn recent_messages_bounded() {
        let mut convo = Conversation::new("t1", "c1", "628123@c.us");
        for i in 0..50 {
            convo.push_message("user", &format!("m{i}"), json!({}));
        }
        let recent = convo.recent_messages();
        assert_eq!(recent.len(), LLM_HISTORY);
        assert_eq!(recent.first().unwrap().content, "m30");
        assert_eq!(recent.last().unwrap().content, "m49");
    }

    #[test]
    fn state_serializes_lowercase() {
        let s = serde_json::to_string(&ConversationState::Greeting).unwrap();
        assert_eq!(s, "\"greeting\"");
        assert_eq!(ConversationState::parse("checkout"), Some(ConversationState::Checkout));
        assert_eq!(ConversationState::parse("weird"), None);
    }
}
