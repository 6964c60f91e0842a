//! AI processing jobs: one request through the pipeline, cache-backed.
//!
//! ```text
//! QUEUED -> PROCESSING -> COMPLETED
//!              |    \
//!              v     -> RETRYING -> QUEUED (redelivered after a delay)
//!            FAILED (retries exhausted)
//! ```
//!
//! Pending retries cannot be cancelled once scheduled on a holding queue, so
//! workers must re-read the job before acting on a late redelivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retrying => "RETRYING",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;
        let allowed: &[JobStatus] = match self {
            Queued => &[Processing],
            Processing => &[Completed, Failed, Retrying],
            // Failed from Retrying covers a retry that could not be scheduled.
            Retrying => &[Queued, Failed],
            Completed | Failed => &[],
        };
        allowed.contains(&target)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(tenant_id: &str, payload: Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            status: JobStatus::Queued,
            payload,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, target: JobStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                entity: "job",
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, result: Value) -> Result<(), DomainError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a failure: schedules a retry when the budget allows, otherwise
    /// the job is terminally failed.
    pub fn fail(&mut self, error: &str, next_retry_at: Option<DateTime<Utc>>) -> Result<(), DomainError> {
        self.error = Some(error.to_string());
        if self.can_retry() {
            self.transition(JobStatus::Retrying)?;
            self.retry_count += 1;
            self.next_retry_at = next_retry_at;
        } else {
            self.transition(JobStatus::Failed)?;
        }
        Ok(())
    }

    /// Redelivery from the holding queue puts the job back to QUEUED.
    pub fn requeue(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Queued)?;
        self.next_retry_at = None;
        Ok(())
    }

    /// Terminal failure for a retry that could not be scheduled.
    pub fn abandon(&mut self, error: &str) -> Result<(), DomainError> {
        self.error = Some(error.to_string());
        self.transition(JobStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn happy_path() {
        let mut job = Job::new("t1", json!({"q": "hello"}), 3);
        job.start_processing().unwrap();
        job.complete(json!({"answer": 42})).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn failure_schedules_retry_until_exhausted() {
        let mut job = Job::new("t1", json!({}), 2);
        for expected_retry in 1..=2u32 {
            job.start_processing().unwrap();
            job.fail("boom", Some(Utc::now())).unwrap();
            assert_eq!(job.status, JobStatus::Retrying);
            assert_eq!(job.retry_count, expected_retry);
            job.requeue().unwrap();
        }
        job.start_processing().unwrap();
        job.fail("boom again", None).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_terminal());
        assert_eq!(job.error.as_deref(), Some("boom again"));
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut job = Job::new("t1", json!({}), 0);
        job.start_processing().unwrap();
        job.complete(json!({})).unwrap();
        assert!(job.start_processing().is_err());
    }

    #[test]
    fn queued_cannot_complete_directly() {
        let mut job = Job::new("t1", json!({}), 0);
        assert!(job.complete(json!({})).is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }
}
