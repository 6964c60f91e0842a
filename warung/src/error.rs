//! Error types, one enum per layer.
//!
//! The taxonomy follows the pipeline's propagation policy: validation errors
//! stop at the HTTP boundary, not-found inside the agent path becomes a tool
//! error result, transient infrastructure errors are retried with backoff and
//! counted by the circuit breaker, and anything unrecognised is caught at the
//! top of the flush callback so the customer still gets a reply.

use thiserror::Error;

/// Cache (Redis / in-memory) errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(String),
    #[error("cache serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Broker (RabbitMQ) errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker connection: {0}")]
    Connection(String),
    #[error("publish to {queue}: {source}")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("declare {name}: {source}")]
    Declare {
        name: String,
        #[source]
        source: lapin::Error,
    },
    #[error("message decode: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<lapin::Error> for BusError {
    fn from(e: lapin::Error) -> Self {
        BusError::Connection(e.to_string())
    }
}

/// LLM call errors, including the resilience layers' own failures.
///
/// `is_retryable` gates both the node-level retry and the graph-level backoff:
/// only timeouts and connection failures are worth retrying. `CircuitOpen` is
/// deliberately not retryable — the breaker exists to make those cheap.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{operation} timed out after {seconds}s")]
    Timeout { seconds: f64, operation: String },

    #[error("llm connection: {0}")]
    Connection(String),

    #[error("llm provider: {0}")]
    Provider(String),

    #[error("circuit breaker '{circuit}' is open after {failures} failures (last error: {})", .last_error.as_deref().unwrap_or("none"))]
    CircuitOpen {
        circuit: String,
        failures: u32,
        last_error: Option<String>,
    },

    #[error("all {attempts} retry attempts exhausted (last error: {last})")]
    BackoffExhausted { attempts: u32, last: Box<LlmError> },

    #[error("invalid llm response: {0}")]
    InvalidResponse(String),

    #[error("llm config: {0}")]
    Config(String),
}

impl LlmError {
    /// Transient errors worth retrying: timeouts and connection resets.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Timeout { .. } | LlmError::Connection(_))
    }
}

/// Domain invariant violations (illegal state transitions, bad quantities).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid transition: {entity} {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("{0}")]
    Invariant(String),
}

/// Repository (Postgres) errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Tool execution errors. The agent's dispatch loop converts these into
/// `{"error": ...}` tool results so the conversation keeps moving.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {0} not available")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("payment gateway: {0}")]
    Payment(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}
