//! Tenant: one business, one WhatsApp session, one LLM configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// WAHA session name; the webhook resolves tenants by this.
    pub wa_session: String,
    /// Name of the LLM configuration row to use for this tenant's agent.
    pub llm_config_name: String,
    /// Tenant-authored system prompt for the agent.
    pub agent_prompt: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
