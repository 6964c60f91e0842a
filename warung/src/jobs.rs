//! Cache-backed job records and retry scheduling.
//!
//! Jobs are the gateway's view of one AI processing request: submitted over
//! HTTP, polled by id, executed by a worker. Failure schedules a delayed
//! redelivery through a holding queue; because those cannot be cancelled,
//! [`JobService::claim`] re-checks the stored state and tells the consumer
//! to drop spurious late redeliveries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::bus::{DelayedPublisher, TaskPublisher};
use crate::cache::KvCache;
use crate::domain::{Job, JobStatus};
use crate::error::CacheError;

const JOB_KEY_PREFIX: &str = "crm:job:";

pub struct JobStore {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(id: &str) -> String {
        format!("{JOB_KEY_PREFIX}{id}")
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, CacheError> {
        match self.cache.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, job: &Job) -> Result<(), CacheError> {
        self.cache
            .set(&Self::key(&job.id), &serde_json::to_string(job)?, Some(self.ttl))
            .await
    }
}

pub struct JobService {
    store: JobStore,
    tasks: Arc<TaskPublisher>,
    delayed: Arc<DelayedPublisher>,
    max_retries: u32,
    retry_delay_min: Duration,
    retry_delay_max: Duration,
}

impl JobService {
    pub fn new(
        store: JobStore,
        tasks: Arc<TaskPublisher>,
        delayed: Arc<DelayedPublisher>,
        max_retries: u32,
        retry_delay_min: Duration,
        retry_delay_max: Duration,
    ) -> Self {
        Self {
            store,
            tasks,
            delayed,
            max_retries,
            retry_delay_min,
            retry_delay_max,
        }
    }

    /// Create a job and enqueue its task message.
    pub async fn submit(&self, tenant_id: &str, payload: Value) -> Result<Job, CacheError> {
        let job = Job::new(tenant_id, payload.clone(), self.max_retries);
        self.store.save(&job).await?;

        let mut task = payload;
        if let Some(map) = task.as_object_mut() {
            map.insert("job_id".into(), json!(job.id));
            map.insert("tenant_id".into(), json!(tenant_id));
        }
        if let Err(e) = self.tasks.publish(&task).await {
            // Surface the job as failed rather than leaving it queued forever.
            warn!(job_id = %job.id, error = %e, "task publish failed");
            let mut failed = job.clone();
            failed.start_processing().ok();
            failed.retry_count = failed.max_retries;
            failed.fail(&e.to_string(), None).ok();
            self.store.save(&failed).await?;
            return Ok(failed);
        }

        info!(job_id = %job.id, "job submitted");
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, CacheError> {
        self.store.get(id).await
    }

    /// Claim a job for processing. Returns `None` when the job is unknown
    /// or no longer claimable — the consumer acks and drops the delivery.
    pub async fn claim(&self, id: &str) -> Result<Option<Job>, CacheError> {
        let mut job = match self.store.get(id).await? {
            Some(job) => job,
            None => return Ok(None),
        };
        if job.start_processing().is_err() {
            warn!(job_id = %id, status = job.status.as_str(), "stale redelivery ignored");
            return Ok(None);
        }
        self.store.save(&job).await?;
        Ok(Some(job))
    }

    pub async fn complete(&self, id: &str, result: Value) -> Result<(), CacheError> {
        if let Some(mut job) = self.store.get(id).await? {
            if job.complete(result).is_ok() {
                self.store.save(&job).await?;
                info!(job_id = %id, "job completed");
            }
        }
        Ok(())
    }

    /// Record a failure; schedules a delayed redelivery while the retry
    /// budget lasts, otherwise the job is terminally failed.
    pub async fn fail(&self, id: &str, error: &str) -> Result<(), CacheError> {
        let mut job = match self.store.get(id).await? {
            Some(job) => job,
            None => return Ok(()),
        };

        let attempt = job.retry_count;
        let delay = Duration::from_secs_f64(
            (self.retry_delay_min.as_secs_f64() * 2f64.powi(attempt as i32))
                .min(self.retry_delay_max.as_secs_f64()),
        );

        let next_retry_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        if job.fail(error, Some(next_retry_at)).is_err() {
            return Ok(());
        }

        if job.status == JobStatus::Retrying {
            let mut payload = job.payload.clone();
            if let Some(map) = payload.as_object_mut() {
                map.insert("job_id".into(), json!(job.id));
                map.insert("tenant_id".into(), json!(job.tenant_id));
            }
            match self.delayed.schedule(&job.id, payload, delay).await {
                Ok(()) => {
                    job.requeue().ok();
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "retry scheduling failed");
                    job.abandon(&format!("retry scheduling failed: {e}")).ok();
                }
            }
        }

        self.store.save(&job).await?;
        Ok(())
    }
}
