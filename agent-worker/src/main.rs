//! Agent worker: consumes chat tasks, buffers per chat, runs the agent
//! graph on flush and publishes responses to the outgoing queue.
//!
//! One process hosts three loops on the shared runtime: the `crm_tasks`
//! consumer (dedup → enrich → buffer), the buffer flush worker (→ agent →
//! outgoing queue) and the `ai_tasks` consumer (jobs + payment webhooks).
//! Shutdown order matters: stop taking deliveries, drain the buffers, then
//! close the connections.

mod chat;
mod task;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warung::agent::AgentRunner;
use warung::buffer::{FlushWorker, MessageBuffer};
use warung::bus::{Bus, DelayedPublisher, EventPublisher, QueueConsumer, TaskPublisher};
use warung::cache::{KvCache, RedisKvCache};
use warung::convo::ConversationStore;
use warung::dedup::MessageDedup;
use warung::domain::EventSink;
use warung::geocode::GeocodingClient;
use warung::jobs::{JobService, JobStore};
use warung::orchestrator::Orchestrator;
use warung::outgoing::ResponsePublisher;
use warung::payment::{MidtransClient, PaymentClient, XenditClient};
use warung::repo::pg::{
    PgCustomerRepo, PgLabelRepo, PgLlmConfigRepo, PgOrderRepo, PgPaymentRepo, PgProductRepo,
    PgTenantRepo,
};
use warung::resilience::{BackoffConfig, CircuitBreakerConfig, CircuitRegistry};
use warung::tools::{
    AddToOrderTool, CancelOrderTool, CheckPaymentStatusTool, CheckStockTool, ConfirmOrderTool,
    CreateOrderTool, GetAvailableLabelsTool, GetCustomerOrdersTool, GetCustomerProfileTool,
    GetOrderStatusTool, GetProductDetailsTool, InitiatePaymentTool, LabelConversationTool,
    SearchProductsTool, ToolRegistry,
};
use warung::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_config::load_and_apply("warung", None)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();

    // Shared infrastructure.
    let cache: Arc<dyn KvCache> = Arc::new(RedisKvCache::connect(&settings.redis_url).await?);
    let bus = Arc::new(Bus::new(settings.rabbitmq_url.clone()));
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;

    // Repositories.
    let tenants = Arc::new(PgTenantRepo::new(pool.clone()));
    let customers = Arc::new(PgCustomerRepo::new(pool.clone()));
    let products = Arc::new(PgProductRepo::new(pool.clone()));
    let orders = Arc::new(PgOrderRepo::new(pool.clone()));
    let payments = Arc::new(PgPaymentRepo::new(pool.clone()));
    let labels = Arc::new(PgLabelRepo::new(pool.clone()));
    let llm_configs = Arc::new(PgLlmConfigRepo::new(pool.clone()));

    // Event exchange.
    let event_sink: Arc<dyn EventSink> = Arc::new(EventPublisher::new(
        bus.clone(),
        settings.rabbitmq_event_exchange.clone(),
    ));

    // Payment gateways; the agent drives the tenant's primary one.
    let midtrans: Arc<dyn PaymentClient> = Arc::new(MidtransClient::new(
        settings.midtrans_server_key.clone(),
        settings.midtrans_is_production,
    ));
    let xendit: Arc<dyn PaymentClient> = Arc::new(XenditClient::new(
        settings.xendit_secret_key.clone(),
        settings.xendit_secret_key.clone(),
    ));
    let primary_gateway = if settings.midtrans_server_key.is_empty()
        && !settings.xendit_secret_key.is_empty()
    {
        xendit.clone()
    } else {
        midtrans.clone()
    };

    // Tool registry: every executor the conversation states can expose.
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SearchProductsTool::new(products.clone())));
    registry.register(Arc::new(GetProductDetailsTool::new(products.clone())));
    registry.register(Arc::new(CheckStockTool::new(products.clone())));
    registry.register(Arc::new(CreateOrderTool::new(orders.clone(), event_sink.clone())));
    registry.register(Arc::new(AddToOrderTool::new(
        orders.clone(),
        products.clone(),
        event_sink.clone(),
    )));
    registry.register(Arc::new(GetOrderStatusTool::new(orders.clone())));
    registry.register(Arc::new(GetCustomerOrdersTool::new(orders.clone())));
    registry.register(Arc::new(ConfirmOrderTool::new(orders.clone(), event_sink.clone())));
    registry.register(Arc::new(CancelOrderTool::new(orders.clone(), event_sink.clone())));
    registry.register(Arc::new(GetCustomerProfileTool::new(customers.clone())));
    registry.register(Arc::new(InitiatePaymentTool::new(
        payments.clone(),
        orders.clone(),
        primary_gateway.clone(),
        event_sink.clone(),
    )));
    registry.register(Arc::new(CheckPaymentStatusTool::new(
        payments.clone(),
        primary_gateway,
        event_sink.clone(),
    )));
    registry.register(Arc::new(LabelConversationTool::new(
        labels.clone(),
        event_sink.clone(),
    )));
    registry.register(Arc::new(GetAvailableLabelsTool::new(labels)));

    // Agent runtime with its resilience settings.
    let circuits = Arc::new(CircuitRegistry::new());
    let runner = Arc::new(AgentRunner::new(
        Arc::new(registry),
        circuits,
        CircuitBreakerConfig {
            failure_threshold: settings.circuit_breaker_failure_threshold,
            success_threshold: settings.circuit_breaker_success_threshold,
            timeout: Duration::from_secs_f64(settings.circuit_breaker_timeout_seconds),
            excluded: |_| false,
        },
        BackoffConfig {
            initial_delay: Duration::from_secs_f64(settings.llm_retry_initial_delay),
            max_delay: Duration::from_secs_f64(settings.llm_retry_max_delay),
            multiplier: settings.llm_retry_multiplier,
            jitter: 0.1,
        },
        settings.llm_max_retries,
    ));

    // Outgoing path.
    let wa_publisher = Arc::new(TaskPublisher::new(
        bus.clone(),
        settings.rabbitmq_wa_queue.clone(),
    ));
    let responses = Arc::new(ResponsePublisher::new(wa_publisher));

    // The flush callback.
    let conversations = Arc::new(ConversationStore::new(cache.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        tenants.clone(),
        customers,
        llm_configs.clone(),
        conversations,
        runner.clone(),
        responses,
        event_sink.clone(),
    ));

    // Ingestion: dedup + buffer + geocoding enrichment.
    let buffer = Arc::new(MessageBuffer::new(
        cache.clone(),
        settings.buffer_initial_delay(),
        Duration::from_secs_f64(2.0),
        settings.buffer_max_delay(),
    ));
    let chat_handler = Arc::new(chat::ChatTaskHandler::new(
        MessageDedup::new(cache.clone(), None, true),
        buffer.clone(),
        Arc::new(GeocodingClient::new(
            settings.google_geocoding_api_key.clone(),
            settings.google_geocoding_base_url.clone(),
        )),
    ));

    // Jobs + payment reconciliation on the ai_tasks queue.
    let ai_tasks = Arc::new(TaskPublisher::new(
        bus.clone(),
        settings.rabbitmq_task_queue.clone(),
    ));
    let delayed = Arc::new(DelayedPublisher::new(
        bus.clone(),
        settings.rabbitmq_task_queue.clone(),
    ));
    let jobs = Arc::new(JobService::new(
        JobStore::new(cache.clone(), Duration::from_secs(settings.redis_job_ttl)),
        ai_tasks,
        delayed,
        settings.job_default_max_retries,
        Duration::from_secs_f64(settings.job_retry_delay_min),
        Duration::from_secs_f64(settings.job_retry_delay_max),
    ));
    let task_handler = Arc::new(task::WorkerTaskHandler::new(
        jobs,
        tenants,
        llm_configs,
        payments,
        orders,
        vec![midtrans, xendit],
        runner,
        event_sink,
    ));

    // Run the loops.
    let cancel = CancellationToken::new();

    let flush_worker = Arc::new(FlushWorker::new(
        buffer,
        orchestrator,
        settings.flush_interval(),
    ));
    let flush_task = {
        let worker = flush_worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let chat_consumer = QueueConsumer::new(bus.clone(), settings.rabbitmq_crm_queue.clone(), 1);
    let chat_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { chat_consumer.run(chat_handler, cancel).await })
    };

    let ai_consumer = QueueConsumer::new(bus.clone(), settings.rabbitmq_task_queue.clone(), 1);
    let ai_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { ai_consumer.run(task_handler, cancel).await })
    };

    info!("agent worker running");
    shutdown_signal().await;
    info!("shutting down: stopping consumers, draining buffers");
    cancel.cancel();

    // Consumers stop first, then the flush worker drains what remains.
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = chat_task.await;
        let _ = ai_task.await;
        let _ = flush_task.await;
    })
    .await;

    info!("agent worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
