//! Sender: consumes `wa_messages` and delivers them through the bridge.
//!
//! Prefetch is 1 and each delivery is acked only after the bridge accepted
//! it, so chunks of one response go out in order. A bridge failure nacks to
//! the DLQ; job-tracked messages additionally record their WA status in the
//! cache for the jobs API to report.

mod service;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warung::bus::{Bus, QueueConsumer};
use warung::cache::RedisKvCache;
use warung::waha::WahaClient;
use warung::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_config::load_and_apply("warung", None)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();

    let bus = Arc::new(Bus::new(settings.rabbitmq_url.clone()));
    let cache = Arc::new(RedisKvCache::connect(&settings.redis_url).await?);
    let waha = Arc::new(WahaClient::new(
        settings.waha_server_url.clone(),
        settings.waha_api_key.clone(),
        settings.waha_session.clone(),
    ));

    if !waha.check_health().await {
        tracing::warn!("bridge health check failed at startup; continuing anyway");
    }

    let handler = Arc::new(service::SenderHandler::new(waha, cache));
    let consumer = QueueConsumer::new(bus, settings.rabbitmq_wa_queue.clone(), 1);

    let cancel = CancellationToken::new();
    let consumer_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(handler, cancel).await })
    };

    info!("sender running");
    shutdown_signal().await;
    cancel.cancel();
    let _ = consumer_task.await;
    info!("sender stopped");
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
