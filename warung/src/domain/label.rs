//! Conversation labels for support triage.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Label {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub color: Option<String>,
}
