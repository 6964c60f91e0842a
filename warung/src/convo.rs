//! Cache-backed conversation hot state.
//!
//! Key layout:
//! - `crm:conversation:{id}` — conversation snapshot (history capped at 100)
//! - `crm:customer:conversation:{customer_id}` — active conversation id
//! - `crm:context:{conversation_id}` — opaque context map
//!
//! Everything expires after 24h of inactivity. Writes are last-write-wins;
//! that is safe because per-chat dispatch is serialised upstream by the
//! buffer's atomic get-and-delete.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::cache::KvCache;
use crate::domain::{Conversation, ConversationState};
use crate::error::CacheError;

const CONVERSATION_PREFIX: &str = "crm:conversation:";
const CUSTOMER_POINTER_PREFIX: &str = "crm:customer:conversation:";
const CONTEXT_PREFIX: &str = "crm:context:";

/// Idle TTL for conversation state.
const CONVERSATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct ConversationStore {
    cache: Arc<dyn KvCache>,
}

impl ConversationStore {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache }
    }

    fn conversation_key(id: &str) -> String {
        format!("{CONVERSATION_PREFIX}{id}")
    }

    fn pointer_key(customer_id: &str) -> String {
        format!("{CUSTOMER_POINTER_PREFIX}{customer_id}")
    }

    fn context_key(conversation_id: &str) -> String {
        format!("{CONTEXT_PREFIX}{conversation_id}")
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, CacheError> {
        match self.cache.get(&Self::conversation_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persist the snapshot and refresh the idle TTL and customer pointer.
    pub async fn save(&self, conversation: &Conversation) -> Result<(), CacheError> {
        self.cache
            .set(
                &Self::conversation_key(&conversation.id),
                &serde_json::to_string(conversation)?,
                Some(CONVERSATION_TTL),
            )
            .await?;
        self.cache
            .set(
                &Self::pointer_key(&conversation.customer_id),
                &conversation.id,
                Some(CONVERSATION_TTL),
            )
            .await
    }

    /// Resolve the customer's conversation or create a fresh one keyed by
    /// the WhatsApp chat id.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        customer_id: &str,
        wa_chat_id: &str,
    ) -> Result<(Conversation, bool), CacheError> {
        if let Some(raw_id) = self.cache.get(&Self::pointer_key(customer_id)).await? {
            if let Some(conversation) = self.get(&raw_id).await? {
                if conversation.state != ConversationState::Completed {
                    return Ok((conversation, false));
                }
            }
        }

        let conversation = Conversation::new(tenant_id, customer_id, wa_chat_id);
        self.save(&conversation).await?;
        Ok((conversation, true))
    }

    pub async fn get_context(
        &self,
        conversation_id: &str,
    ) -> Result<Map<String, Value>, CacheError> {
        match self.cache.get(&Self::context_key(conversation_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Map::new()),
        }
    }

    pub async fn set_context(
        &self,
        conversation_id: &str,
        context: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        self.cache
            .set(
                &Self::context_key(conversation_id),
                &serde_json::to_string(context)?,
                Some(CONVERSATION_TTL),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKvCache;
    use crate::domain::{HISTORY_CAP, LLM_HISTORY};
    use serde_json::json;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(InMemoryKvCache::new()))
    }

    #[tokio::test]
    async fn get_or_create_roundtrip() {
        let store = store();
        let (convo, created) = store.get_or_create("t1", "c1", "628@c.us").await.unwrap();
        assert!(created);
        assert_eq!(convo.id, "628@c.us");
        assert_eq!(convo.state, ConversationState::Greeting);

        let (again, created) = store.get_or_create("t1", "c1", "628@c.us").await.unwrap();
        assert!(!created);
        assert_eq!(again.id, convo.id);
    }

    #[tokio::test]
    async fn completed_conversation_is_replaced() {
        let store = store();
        let (mut convo, _) = store.get_or_create("t1", "c1", "628@c.us").await.unwrap();
        convo.transition_to(ConversationState::Completed).unwrap();
        store.save(&convo).await.unwrap();

        let (fresh, created) = store.get_or_create("t1", "c1", "628@c.us").await.unwrap();
        assert!(created);
        assert_eq!(fresh.state, ConversationState::Greeting);
    }

    #[tokio::test]
    async fn history_survives_save_and_stays_capped() {
        let store = store();
        let (mut convo, _) = store.get_or_create("t1", "c1", "628@c.us").await.unwrap();
        for i in 0..(HISTORY_CAP + 10) {
            convo.push_message("user", &format!("m{i}"), json!({}));
        }
        store.save(&convo).await.unwrap();

        let loaded = store.get("628@c.us").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), HISTORY_CAP);
        assert_eq!(loaded.recent_messages().len(), LLM_HISTORY);
    }

    #[tokio::test]
    async fn context_roundtrip() {
        let store = store();
        let mut ctx = Map::new();
        ctx.insert("previous_topic".into(), json!("keripik"));
        store.set_context("628@c.us", &ctx).await.unwrap();
        let loaded = store.get_context("628@c.us").await.unwrap();
        assert_eq!(loaded.get("previous_topic"), Some(&json!("keripik")));
        assert!(store.get_context("other").await.unwrap().is_empty());
    }
}
