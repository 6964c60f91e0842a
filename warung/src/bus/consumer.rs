//! Queue consumer with prefetch, manual ack and DLQ routing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::BusError;

use super::{declare_task_queue, Bus};

/// Handler for one decoded message. An `Err` nacks the delivery to the DLQ.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Value)
        -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct QueueConsumer {
    bus: Arc<Bus>,
    queue: String,
    prefetch: u16,
}

impl QueueConsumer {
    pub fn new(bus: Arc<Bus>, queue: impl Into<String>, prefetch: u16) -> Self {
        Self {
            bus,
            queue: queue.into(),
            prefetch,
        }
    }

    /// Consume until cancelled. A broker failure tears the session down and
    /// the loop re-acquires a channel through the supervisor.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>, cancel: CancellationToken) {
        info!(queue = %self.queue, prefetch = self.prefetch, "consumer starting");

        while !cancel.is_cancelled() {
            match self.consume_session(handler.clone(), &cancel).await {
                Ok(()) => break, // cancelled
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "consumer session ended");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(queue = %self.queue, "consumer stopped");
    }

    async fn consume_session(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        let channel = self.bus.channel().await?;
        declare_task_queue(&channel, &self.queue).await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let tag = format!("warung-{}-{}", self.queue, Uuid::new_v4().simple());
        let mut consumer = channel
            .basic_consume(
                &self.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.process(&handler, delivery).await,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(BusError::Connection("consumer stream closed".into())),
                    }
                }
            }
        }
    }

    async fn process(&self, handler: &Arc<dyn MessageHandler>, delivery: Delivery) {
        let payload: Value = match serde_json::from_slice(&delivery.data) {
            Ok(payload) => payload,
            Err(e) => {
                // Undecodable messages go straight to the DLQ.
                error!(queue = %self.queue, error = %e, "message decode failed");
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(queue = %self.queue, error = %e, "nack failed");
                }
                return;
            }
        };

        match handler.handle(payload).await {
            Ok(()) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(queue = %self.queue, error = %e, "ack failed");
                }
            }
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "handler failed, dead-lettering");
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(queue = %self.queue, error = %e, "nack failed");
                }
            }
        }
    }
}
