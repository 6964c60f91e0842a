//! `ai_tasks` handler: one-shot AI jobs and payment webhook reconciliation.
//!
//! Payment webhooks were acknowledged fast by the gateway; here the payload
//! is verified against the provider's signature before any status is
//! trusted. A verification or processing failure returns `Err`, which
//! dead-letters the delivery for manual replay — the customer is not
//! informed inline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use warung::agent::{AgentRequest, AgentRunner};
use warung::bus::MessageHandler;
use warung::domain::{ConversationState, DomainEvent, EventSink, PaymentStatus};
use warung::jobs::JobService;
use warung::llm::ChatMessage;
use warung::payment::PaymentClient;
use warung::repo::{LlmConfigRepo, OrderRepo, PaymentRepo, TenantRepo};

pub struct WorkerTaskHandler {
    jobs: Arc<JobService>,
    tenants: Arc<dyn TenantRepo>,
    llm_configs: Arc<dyn LlmConfigRepo>,
    payments: Arc<dyn PaymentRepo>,
    orders: Arc<dyn OrderRepo>,
    gateways: Vec<Arc<dyn PaymentClient>>,
    runner: Arc<AgentRunner>,
    events: Arc<dyn EventSink>,
}

impl WorkerTaskHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<JobService>,
        tenants: Arc<dyn TenantRepo>,
        llm_configs: Arc<dyn LlmConfigRepo>,
        payments: Arc<dyn PaymentRepo>,
        orders: Arc<dyn OrderRepo>,
        gateways: Vec<Arc<dyn PaymentClient>>,
        runner: Arc<AgentRunner>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            jobs,
            tenants,
            llm_configs,
            payments,
            orders,
            gateways,
            runner,
            events,
        }
    }

    fn gateway(&self, provider: &str) -> Option<&Arc<dyn PaymentClient>> {
        self.gateways.iter().find(|g| g.provider() == provider)
    }

    /// Provider-specific status field of a webhook body.
    fn webhook_status(provider: &str, body: &Value) -> Option<PaymentStatus> {
        match provider {
            "midtrans" => match body["transaction_status"].as_str()? {
                "settlement" | "capture" => Some(PaymentStatus::Paid),
                "pending" => Some(PaymentStatus::PendingPayment),
                "deny" | "failure" => Some(PaymentStatus::Failed),
                "expire" => Some(PaymentStatus::Expired),
                "cancel" => Some(PaymentStatus::Cancelled),
                "refund" | "partial_refund" => Some(PaymentStatus::Refunded),
                _ => None,
            },
            "xendit" => match body["status"].as_str()? {
                "PAID" | "SETTLED" => Some(PaymentStatus::Paid),
                "PENDING" => Some(PaymentStatus::PendingPayment),
                "EXPIRED" => Some(PaymentStatus::Expired),
                _ => None,
            },
            _ => None,
        }
    }

    async fn process_payment_webhook(
        &self,
        payload: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let provider = payload["provider"].as_str().unwrap_or_default();
        let order_id = payload["order_id"].as_str().unwrap_or_default();
        let body = &payload["body"];

        let gateway = self
            .gateway(provider)
            .ok_or_else(|| format!("unknown payment provider: {provider}"))?;

        if !gateway.verify_webhook_signature(body) {
            return Err(format!("webhook signature verification failed for {order_id}").into());
        }

        let new_status = Self::webhook_status(provider, body)
            .ok_or_else(|| format!("unrecognized webhook status for {order_id}"))?;

        let mut payment = self
            .payments
            .get_by_order(order_id)
            .await?
            .ok_or_else(|| format!("no payment record for order {order_id}"))?;

        if payment.status == new_status {
            info!(order_id, status = new_status.as_str(), "webhook status already applied");
            return Ok(());
        }
        if !payment.status.can_transition_to(new_status) {
            // Gateways replay webhooks out of order; a stale status is
            // not an error worth a DLQ round trip.
            warn!(
                order_id,
                from = payment.status.as_str(),
                to = new_status.as_str(),
                "ignoring illegal payment transition from webhook"
            );
            return Ok(());
        }

        let from = payment.set_status(new_status)?;
        self.payments.save(&payment).await?;
        self.events
            .publish(DomainEvent::PaymentStatusChanged {
                payment_id: payment.id.clone(),
                from: from.as_str().to_string(),
                to: new_status.as_str().to_string(),
            })
            .await;

        // Mirror settled payments onto the order.
        if let Some(mut order) = self.orders.get_by_id(&payment.order_id).await? {
            if order.payment_status != new_status
                && order.payment_status.can_transition_to(new_status)
            {
                order.set_payment_status(new_status)?;
                if new_status == PaymentStatus::Paid
                    && order.status.can_transition_to(warung::domain::OrderStatus::Processing)
                {
                    let from = order.set_status(warung::domain::OrderStatus::Processing)?;
                    self.events
                        .publish(DomainEvent::OrderStatusChanged {
                            order_id: order.id.clone(),
                            from: from.as_str().to_string(),
                            to: order.status.as_str().to_string(),
                        })
                        .await;
                }
                self.orders.save(&order).await?;
            }
        }

        info!(order_id, status = new_status.as_str(), "payment reconciled");
        Ok(())
    }

    /// One-shot AI job: no conversation, one prompt through the graph.
    async fn process_job(
        &self,
        payload: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let job_id = payload["job_id"].as_str().unwrap_or_default();
        let job = match self.jobs.claim(job_id).await? {
            Some(job) => job,
            // Unknown or stale redelivery; consult-state-then-drop.
            None => return Ok(()),
        };

        let prompt = job.payload["prompt"]
            .as_str()
            .or_else(|| job.payload["content"].as_str())
            .unwrap_or_default()
            .to_string();
        if prompt.is_empty() {
            self.jobs.fail(job_id, "job payload has no prompt").await?;
            return Ok(());
        }

        let tenant = match self.tenants.get_by_id(&job.tenant_id).await? {
            Some(tenant) if tenant.is_active => tenant,
            _ => {
                self.jobs.fail(job_id, "tenant missing or inactive").await?;
                return Ok(());
            }
        };
        let llm_config = match self.llm_configs.get_by_name(&tenant.llm_config_name).await? {
            Some(config) => config,
            None => {
                self.jobs
                    .fail(job_id, &format!("llm config {} not found", tenant.llm_config_name))
                    .await?;
                return Ok(());
            }
        };

        let outcome = self
            .runner
            .run(AgentRequest {
                llm_config,
                system_prompt: tenant.agent_prompt.clone(),
                tenant_id: tenant.id.clone(),
                customer_id: format!("job-{job_id}"),
                conversation_id: format!("job-{job_id}"),
                customer_context: json!({}),
                conversation_state: ConversationState::Support,
                context: Map::new(),
                history: vec![ChatMessage::user(prompt)],
                moderate: true,
            })
            .await;

        self.jobs
            .complete(
                job_id,
                json!({
                    "response": outcome.text,
                    "tokens_used": outcome.tokens_used,
                    "agent_type": outcome.agent_type.as_str(),
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for WorkerTaskHandler {
    async fn handle(
        &self,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match payload["type"].as_str() {
            Some("payment_webhook") => self.process_payment_webhook(&payload).await,
            Some("ai_job") => self.process_job(&payload).await,
            other => {
                warn!(task_type = ?other, "unknown task type");
                Ok(())
            }
        }
    }
}
