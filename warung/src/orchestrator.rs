//! Flush callback: one buffered user turn, end to end.
//!
//! Resolve tenant → customer → conversation, run the agent graph, apply a
//! legal state change, append the reply and publish it as paced bubbles.
//! Whatever goes wrong inside, the customer gets *some* reply: the handler
//! catches everything and falls back to a minimal apology.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentRequest, AgentRunner};
use crate::buffer::FlushHandler;
use crate::convo::ConversationStore;
use crate::domain::{Customer, DomainEvent, EventSink};
use crate::llm::ChatMessage;
use crate::outgoing::OutgoingPublisher;
use crate::repo::{CustomerRepo, LlmConfigRepo, TenantRepo};

const SERVICE_UNAVAILABLE: &str = "Sorry, this service is currently unavailable.";
const CONFIGURATION_ERROR: &str = "Sorry, there's a configuration error. Please try again later.";
const MINIMAL_APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

pub struct Orchestrator {
    tenants: Arc<dyn TenantRepo>,
    customers: Arc<dyn CustomerRepo>,
    llm_configs: Arc<dyn LlmConfigRepo>,
    conversations: Arc<ConversationStore>,
    runner: Arc<AgentRunner>,
    outgoing: Arc<dyn OutgoingPublisher>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        tenants: Arc<dyn TenantRepo>,
        customers: Arc<dyn CustomerRepo>,
        llm_configs: Arc<dyn LlmConfigRepo>,
        conversations: Arc<ConversationStore>,
        runner: Arc<AgentRunner>,
        outgoing: Arc<dyn OutgoingPublisher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            tenants,
            customers,
            llm_configs,
            conversations,
            runner,
            outgoing,
            events,
        }
    }

    /// Best-effort static reply; failures here are only logged.
    async fn send_static(&self, wa_session: &str, chat_id: &str, text: &str) {
        if let Err(e) = self
            .outgoing
            .publish_split(wa_session, chat_id, text, json!({}))
            .await
        {
            error!(chat_id, error = %e, "failed to publish static reply");
        }
    }

    async fn resolve_customer(
        &self,
        tenant_id: &str,
        chat_id: &str,
        metadata: &Value,
    ) -> Result<Customer, Box<dyn std::error::Error + Send + Sync>> {
        let push_name = metadata["push_name"].as_str();

        if let Some(existing) = self.customers.find_by_chat(tenant_id, chat_id).await? {
            // The bridge-provided name fills the profile only when empty;
            // a name the customer set in CRM is never overwritten.
            if existing.name.is_none() {
                if let Some(name) = push_name {
                    self.customers.update_name(&existing.id, name).await?;
                    self.events
                        .publish(DomainEvent::CustomerUpdated {
                            customer_id: existing.id.clone(),
                        })
                        .await;
                    return Ok(Customer {
                        name: Some(name.to_string()),
                        ..existing
                    });
                }
            }
            return Ok(existing);
        }

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            wa_chat_id: chat_id.to_string(),
            phone_number: metadata["phone_number"].as_str().map(str::to_string),
            name: push_name.map(str::to_string),
            email: None,
            address: None,
            total_orders: 0,
            total_spent: 0,
            is_vip: false,
            created_at: Utc::now(),
        };
        self.customers.create(&customer).await?;
        self.events
            .publish(DomainEvent::CustomerCreated {
                customer_id: customer.id.clone(),
                tenant_id: tenant_id.to_string(),
            })
            .await;
        Ok(customer)
    }

    /// The flush pipeline proper; errors bubble to [`FlushHandler::handle`]
    /// which converts them into the minimal apology.
    async fn process(
        &self,
        chat_id: &str,
        combined: &str,
        metadata: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let wa_session = metadata["wa_session"].as_str().unwrap_or_default().to_string();

        // 1. Tenant by session; unknown or inactive tenants get a static reply.
        let tenant = match self.tenants.get_by_wa_session(&wa_session).await? {
            Some(tenant) if tenant.is_active => tenant,
            Some(_) | None => {
                warn!(chat_id, %wa_session, "no active tenant for session");
                self.send_static(&wa_session, chat_id, SERVICE_UNAVAILABLE).await;
                return Ok(());
            }
        };

        // 2–3. Customer and conversation.
        let customer = self.resolve_customer(&tenant.id, chat_id, &metadata).await?;
        let (mut conversation, created) = self
            .conversations
            .get_or_create(&tenant.id, &customer.id, chat_id)
            .await?;
        if created {
            self.events
                .publish(DomainEvent::ConversationCreated {
                    conversation_id: conversation.id.clone(),
                    tenant_id: tenant.id.clone(),
                    customer_id: customer.id.clone(),
                })
                .await;
        }

        // 4. Record the user turn.
        conversation.push_message(
            "user",
            combined,
            json!({
                "message_id": metadata["message_id"],
                "buffered": metadata["buffered"],
            }),
        );
        self.conversations.save(&conversation).await?;
        self.events
            .publish(DomainEvent::ConversationMessageAdded {
                conversation_id: conversation.id.clone(),
                role: "user".to_string(),
            })
            .await;

        // 5. History and customer context for the prompt.
        let history: Vec<ChatMessage> = conversation
            .recent_messages()
            .iter()
            .map(|m| match m.role.as_str() {
                "assistant" => ChatMessage::assistant(m.content.clone()),
                _ => ChatMessage::user(m.content.clone()),
            })
            .collect();
        let customer_context = customer.context_summary();

        // 6. LLM configuration.
        let llm_config = match self.llm_configs.get_by_name(&tenant.llm_config_name).await? {
            Some(config) => config,
            None => {
                error!(
                    tenant_id = %tenant.id,
                    config = %tenant.llm_config_name,
                    "llm config missing"
                );
                self.send_static(&wa_session, chat_id, CONFIGURATION_ERROR).await;
                return Ok(());
            }
        };

        // 7. Run the agent graph.
        self.events
            .publish(DomainEvent::ProcessingStarted {
                chat_id: chat_id.to_string(),
            })
            .await;

        let context = self.conversations.get_context(&conversation.id).await?;
        let outcome = self
            .runner
            .run(AgentRequest {
                llm_config,
                system_prompt: tenant.agent_prompt.clone(),
                tenant_id: tenant.id.clone(),
                customer_id: customer.id.clone(),
                conversation_id: conversation.id.clone(),
                customer_context,
                conversation_state: conversation.state,
                context,
                history,
                moderate: true,
            })
            .await;

        // 8. Apply a suggested state change only when it is a legal move.
        if let Some(new_state) = outcome.conversation_state {
            match conversation.transition_to(new_state) {
                Ok(from) => {
                    info!(
                        conversation_id = %conversation.id,
                        from = from.as_str(),
                        to = new_state.as_str(),
                        "conversation state changed"
                    );
                    self.events
                        .publish(DomainEvent::ConversationStateChanged {
                            conversation_id: conversation.id.clone(),
                            from: from.as_str().to_string(),
                            to: new_state.as_str().to_string(),
                        })
                        .await;
                }
                Err(e) => warn!(conversation_id = %conversation.id, error = %e, "state change skipped"),
            }
        }

        // 9. Record the assistant turn.
        conversation.push_message(
            "assistant",
            &outcome.text,
            json!({
                "tokens": outcome.tokens_used,
                "agent_type": outcome.agent_type.as_str(),
            }),
        );
        self.conversations.save(&conversation).await?;
        self.events
            .publish(DomainEvent::ConversationMessageAdded {
                conversation_id: conversation.id.clone(),
                role: "assistant".to_string(),
            })
            .await;

        // 10. Ship the reply as paced bubbles.
        self.outgoing
            .publish_split(
                &wa_session,
                chat_id,
                &outcome.text,
                json!({
                    "conversation_id": conversation.id,
                    "intent": outcome.intent,
                    "tools_used": outcome.tools_used,
                }),
            )
            .await?;

        self.events
            .publish(DomainEvent::ProcessingCompleted {
                chat_id: chat_id.to_string(),
                tokens_used: outcome.tokens_used,
            })
            .await;

        Ok(())
    }
}

#[async_trait]
impl FlushHandler for Orchestrator {
    async fn handle(
        &self,
        chat_id: &str,
        combined: &str,
        metadata: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let wa_session = metadata["wa_session"].as_str().unwrap_or_default().to_string();

        if let Err(e) = self.process(chat_id, combined, metadata).await {
            error!(chat_id, error = %e, "message processing failed");
            self.events
                .publish(DomainEvent::ProcessingFailed {
                    chat_id: chat_id.to_string(),
                    error: e.to_string(),
                })
                .await;
            // The customer is never left without a response.
            self.send_static(&wa_session, chat_id, MINIMAL_APOLOGY).await;
        }
        Ok(())
    }
}
