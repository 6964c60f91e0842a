//! Conversation labelling tools for the support flow.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{DomainEvent, EventSink};
use crate::error::{RepoError, ToolError};
use crate::repo::LabelRepo;

use super::{required_str, Tool, ToolCallContext, ToolSpec};

pub struct GetAvailableLabelsTool {
    labels: Arc<dyn LabelRepo>,
}

impl GetAvailableLabelsTool {
    pub fn new(labels: Arc<dyn LabelRepo>) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl Tool for GetAvailableLabelsTool {
    fn name(&self) -> &str {
        "get_available_labels"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_available_labels".into(),
            description: "List the labels that can be applied to this conversation.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let labels = self.labels.list_for_tenant(&ctx.tenant_id).await?;
        Ok(json!({
            "labels": labels.iter().map(|l| json!({
                "label_id": l.id,
                "name": l.name,
                "color": l.color,
            })).collect::<Vec<_>>(),
        }))
    }
}

pub struct LabelConversationTool {
    labels: Arc<dyn LabelRepo>,
    events: Arc<dyn EventSink>,
}

impl LabelConversationTool {
    pub fn new(labels: Arc<dyn LabelRepo>, events: Arc<dyn EventSink>) -> Self {
        Self { labels, events }
    }
}

#[async_trait]
impl Tool for LabelConversationTool {
    fn name(&self) -> &str {
        "label_conversation"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "label_conversation".into(),
            description: "Apply a label to this conversation for support triage. \
                          Use get_available_labels first to find the label id."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "label_id": {"type": "string"}
                },
                "required": ["label_id"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let label_id = required_str(&args, "label_id")?;

        let known = self
            .labels
            .list_for_tenant(&ctx.tenant_id)
            .await?
            .into_iter()
            .find(|l| l.id == label_id)
            .ok_or(RepoError::NotFound {
                entity: "label",
                id: label_id.to_string(),
            })?;

        self.labels.attach(&ctx.conversation_id, label_id).await?;
        self.events
            .publish(DomainEvent::LabelApplied {
                conversation_id: ctx.conversation_id.clone(),
                label_id: label_id.to_string(),
            })
            .await;

        Ok(json!({
            "conversation_id": ctx.conversation_id,
            "label_id": known.id,
            "label_name": known.name,
            "applied": true,
        }))
    }
}
