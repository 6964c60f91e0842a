//! Timeout wrapper for LLM calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

/// Enforce a deadline on `fut`; expiry cancels the in-flight request and
/// yields `LlmError::Timeout` carrying the operation name.
pub async fn with_timeout<T, F>(
    fut: F,
    timeout: Duration,
    operation: &str,
) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, seconds = timeout.as_secs_f64(), "operation timed out");
            Err(LlmError::Timeout {
                seconds: timeout.as_secs_f64(),
                operation: operation.to_string(),
            })
        }
    }
}
