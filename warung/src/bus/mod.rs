//! Message bus fabric (RabbitMQ via lapin).
//!
//! Contracts:
//! - task queues are durable, delivery persistent, manual ack; a failed
//!   handler (or an undecodable body) nacks without requeue, which routes
//!   the message to the queue's DLQ through its DLX;
//! - delayed redelivery uses TTL'd holding queues that dead-letter back to
//!   the target queue — pending retries cannot be cancelled, so consumers
//!   re-check job state before acting;
//! - domain events go to a topic exchange, routing key = dotted event name.
//!
//! lapin has no robust-connection mode, so [`Bus`] is a small supervisor:
//! it redials with capped backoff and hands out channels; publishers and
//! consumers re-acquire their channel through it after any failure.

mod consumer;
mod delay;
mod publisher;

pub use consumer::{MessageHandler, QueueConsumer};
pub use delay::DelayedPublisher;
pub use publisher::{EventPublisher, TaskPublisher};

use std::time::Duration;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::BusError;

/// Redial attempts before a caller sees the connection error.
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_START: Duration = Duration::from_millis(500);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Connection supervisor: owns the broker connection, redials on demand.
pub struct Bus {
    url: String,
    connection: Mutex<Option<Connection>>,
}

impl Bus {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    /// A fresh channel on a live connection, redialling if needed.
    pub async fn channel(&self) -> Result<Channel, BusError> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(connection.create_channel().await?);
            }
        }

        let mut delay = CONNECT_BACKOFF_START;
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Connection::connect(&self.url, ConnectionProperties::default()).await {
                Ok(connection) => {
                    info!(attempt, "connected to broker");
                    let channel = connection.create_channel().await?;
                    *guard = Some(connection);
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "broker connect failed");
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_BACKOFF_MAX);
                }
            }
        }

        Err(BusError::Connection(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "broker unreachable".to_string()),
        ))
    }
}

/// Declare a durable task queue together with its DLX and DLQ.
pub async fn declare_task_queue(channel: &Channel, queue: &str) -> Result<(), BusError> {
    let dlx = format!("{queue}.dlx");
    let dlq = format!("{queue}.dlq");

    channel
        .exchange_declare(
            &dlx,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Declare {
            name: dlx.clone(),
            source: e,
        })?;

    channel
        .queue_declare(
            &dlq,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Declare {
            name: dlq.clone(),
            source: e,
        })?;

    channel
        .queue_bind(
            &dlq,
            &dlx,
            queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Declare {
            name: dlq.clone(),
            source: e,
        })?;

    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dlx.clone().into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(queue.to_string().into()),
    );

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| BusError::Declare {
            name: queue.to_string(),
            source: e,
        })?;

    Ok(())
}
