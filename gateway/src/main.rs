//! Gateway: accepts webhooks and API requests, publishes to task queues.
//!
//! Thin by design — nothing is processed inline. A WhatsApp webhook becomes
//! exactly one `crm_tasks` message; a payment webhook is acknowledged fast
//! and verified on the worker side; jobs are submitted and polled through
//! the cache-backed job store.

mod app;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warung::bus::{Bus, DelayedPublisher, TaskPublisher};
use warung::cache::RedisKvCache;
use warung::jobs::{JobService, JobStore};
use warung::Settings;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "warung webhook gateway")]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8000")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_config::load_and_apply("warung", None)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let settings = Settings::from_env();

    let bus = Arc::new(Bus::new(settings.rabbitmq_url.clone()));
    let cache = Arc::new(RedisKvCache::connect(&settings.redis_url).await?);

    let crm_tasks = Arc::new(TaskPublisher::new(bus.clone(), settings.rabbitmq_crm_queue.clone()));
    let ai_tasks = Arc::new(TaskPublisher::new(bus.clone(), settings.rabbitmq_task_queue.clone()));
    let delayed = Arc::new(DelayedPublisher::new(
        bus.clone(),
        settings.rabbitmq_task_queue.clone(),
    ));

    let jobs = Arc::new(JobService::new(
        JobStore::new(cache, Duration::from_secs(settings.redis_job_ttl)),
        ai_tasks.clone(),
        delayed,
        settings.job_default_max_retries,
        Duration::from_secs_f64(settings.job_retry_delay_min),
        Duration::from_secs_f64(settings.job_retry_delay_max),
    ));

    let state = Arc::new(app::AppState {
        webhook_secret: settings.waha_webhook_secret.clone(),
        crm_tasks,
        ai_tasks,
        jobs,
    });

    let router = app::router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!(bind = %args.bind, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
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
    info!("shutdown signal received");
}
