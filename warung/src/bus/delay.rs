//! Delayed redelivery via TTL'd holding queues.
//!
//! For each distinct delay (rounded to 100 ms) a holding queue
//! `{target}.delay.{ms}ms` is declared lazily with a message TTL and a
//! dead-letter route back to the target queue through the default exchange.
//! Once published, a pending retry cannot be pulled back; consumers must
//! consult job state before acting on a late redelivery.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::BusError;

use super::{declare_task_queue, Bus};

pub struct DelayedPublisher {
    bus: Arc<Bus>,
    target_queue: String,
    channel: Mutex<Option<Channel>>,
    declared: Mutex<HashSet<u64>>,
}

impl DelayedPublisher {
    pub fn new(bus: Arc<Bus>, target_queue: impl Into<String>) -> Self {
        Self {
            bus,
            target_queue: target_queue.into(),
            channel: Mutex::new(None),
            declared: Mutex::new(HashSet::new()),
        }
    }

    /// Round to 100 ms so holding queues are reused across similar delays.
    fn round_delay_ms(delay: Duration) -> u64 {
        let ms = delay.as_millis() as u64;
        ((ms + 50) / 100 * 100).max(100)
    }

    async fn ensure_channel(&self) -> Result<Channel, BusError> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }
        // A reconnect invalidates previous declarations' bookkeeping.
        self.declared.lock().await.clear();
        let channel = self.bus.channel().await?;
        declare_task_queue(&channel, &self.target_queue).await?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn ensure_holding_queue(
        &self,
        channel: &Channel,
        delay_ms: u64,
    ) -> Result<String, BusError> {
        let name = format!("{}.delay.{delay_ms}ms", self.target_queue);

        let mut declared = self.declared.lock().await;
        if declared.contains(&delay_ms) {
            return Ok(name);
        }

        let mut args = FieldTable::default();
        args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(delay_ms as i64),
        );
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".to_string().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.target_queue.clone().into()),
        );

        channel
            .queue_declare(
                &name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| BusError::Declare {
                name: name.clone(),
                source: e,
            })?;

        declared.insert(delay_ms);
        debug!(queue = %name, ttl_ms = delay_ms, "declared holding queue");
        Ok(name)
    }

    /// Schedule a message for redelivery to the target queue after `delay`.
    pub async fn schedule(
        &self,
        correlation_id: &str,
        mut payload: Value,
        delay: Duration,
    ) -> Result<(), BusError> {
        let delay_ms = Self::round_delay_ms(delay);
        let channel = self.ensure_channel().await?;
        let holding_queue = self.ensure_holding_queue(&channel, delay_ms).await?;

        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "retry_scheduled_at".into(),
                Value::String(Utc::now().to_rfc3339()),
            );
            map.insert(
                "retry_delay_seconds".into(),
                serde_json::json!(delay_ms as f64 / 1000.0),
            );
        }

        let body = serde_json::to_vec(&payload)?;
        let _confirm = channel
            .basic_publish(
                "",
                &holding_queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2)
                    .with_correlation_id(correlation_id.into()),
            )
            .await
            .map_err(|e| BusError::Publish {
                queue: holding_queue.clone(),
                source: e,
            })?;

        info!(
            correlation_id,
            queue = %holding_queue,
            delay_ms,
            "scheduled delayed redelivery"
        );
        Ok(())
    }

    /// Delay with exponential backoff for a retry attempt (0-indexed),
    /// bounded by `[min_delay, max_delay]`.
    pub async fn schedule_with_backoff(
        &self,
        correlation_id: &str,
        payload: Value,
        attempt: u32,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Result<(), BusError> {
        let delay = min_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let delay = Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()));
        self.schedule(correlation_id, payload, delay).await
    }
}
