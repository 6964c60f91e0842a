//! Publishers: direct-to-queue tasks and topic-exchange events.

use std::sync::Arc;

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::domain::{DomainEvent, EventSink};
use crate::error::BusError;

use super::{declare_task_queue, Bus};

/// Publishes persistent JSON messages to one durable queue.
pub struct TaskPublisher {
    bus: Arc<Bus>,
    queue: String,
    channel: Mutex<Option<Channel>>,
}

impl TaskPublisher {
    pub fn new(bus: Arc<Bus>, queue: impl Into<String>) -> Self {
        Self {
            bus,
            queue: queue.into(),
            channel: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn ensure_channel(&self) -> Result<Channel, BusError> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }
        let channel = self.bus.channel().await?;
        declare_task_queue(&channel, &self.queue).await?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    pub async fn publish(&self, payload: &Value) -> Result<(), BusError> {
        let channel = self.ensure_channel().await?;
        let body = serde_json::to_vec(payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| BusError::Publish {
                queue: self.queue.clone(),
                source: e,
            })?
            .await
            .map_err(|e| BusError::Publish {
                queue: self.queue.clone(),
                source: e,
            })?;

        debug!(queue = %self.queue, "published task message");
        Ok(())
    }
}

/// Publishes domain events on the topic exchange; fire-and-forget.
pub struct EventPublisher {
    bus: Arc<Bus>,
    exchange: String,
    channel: Mutex<Option<Channel>>,
}

impl EventPublisher {
    pub fn new(bus: Arc<Bus>, exchange: impl Into<String>) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
            channel: Mutex::new(None),
        }
    }

    async fn ensure_channel(&self) -> Result<Channel, BusError> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }
        let channel = self.bus.channel().await?;
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Declare {
                name: self.exchange.clone(),
                source: e,
            })?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    pub async fn publish_event(&self, event: &DomainEvent) -> Result<(), BusError> {
        let channel = self.ensure_channel().await?;
        let body = serde_json::to_vec(&event.payload())?;
        let routing_key = event.routing_key();

        let _confirm = channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BusError::Publish {
                queue: routing_key.to_string(),
                source: e,
            })?;

        debug!(routing_key, "published event");
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventSink for EventPublisher {
    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.publish_event(&event).await {
            error!(routing_key = event.routing_key(), error = %e, "event publish failed");
        }
    }
}
