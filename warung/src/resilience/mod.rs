//! Resilience primitives wrapped around every LLM call.
//!
//! The sandwich, outermost first: graph-level backoff (in the agent runner),
//! per-configuration circuit breaker, per-call timeout, node-level retry.
//! The breaker observes each individual attempt, so a persistently failing
//! provider opens the circuit within `failure_threshold` attempts and the
//! remaining retries fail fast.

mod backoff;
mod circuit;
mod timeout;

pub use backoff::{retry_with_backoff, BackoffConfig};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};
pub use timeout::with_timeout;
