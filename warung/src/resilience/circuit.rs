//! Circuit breaker guarding a remote dependency.
//!
//! States: CLOSED (counting failures), OPEN (failing fast), HALF_OPEN
//! (probing recovery). Transitions:
//!
//! - CLOSED → OPEN when `failure_count >= failure_threshold`
//! - OPEN → HALF_OPEN after `timeout` has elapsed since the last failure
//! - HALF_OPEN → CLOSED when `success_count >= success_threshold`
//! - HALF_OPEN → OPEN on any failure
//!
//! The per-circuit lock is held only for the state check and the result
//! recording; the guarded future runs outside it so closed-state calls
//! proceed concurrently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in half-open required to close again.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub timeout: Duration,
    /// Errors for which `excluded` returns true do not count as failures.
    pub excluded: fn(&LlmError) -> bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            excluded: |_| false,
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_error: Option<String>,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    total_opens: u64,
}

struct Inner {
    state: CircuitState,
    stats: Stats,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                stats: Stats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner);
        inner.state
    }

    /// Execute `fut` through the breaker.
    ///
    /// Open circuit ⇒ `LlmError::CircuitOpen` without polling the future.
    /// The lock is released while the future runs.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.refresh(&mut inner);
            if inner.state == CircuitState::Open {
                return Err(LlmError::CircuitOpen {
                    circuit: self.name.clone(),
                    failures: inner.stats.failure_count,
                    last_error: inner.stats.last_failure_error.clone(),
                });
            }
            inner.stats.total_requests += 1;
        }

        match fut.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                if !(self.config.excluded)(&e) {
                    self.record_failure(&e).await;
                }
                Err(e)
            }
        }
    }

    /// OPEN → HALF_OPEN once the open timeout has elapsed. Lock held by caller.
    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .stats
                .last_failure_at
                .map(|t| t.elapsed())
                .unwrap_or_default();
            if elapsed >= self.config.timeout {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats.success_count += 1;
        inner.stats.total_successes += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                if inner.stats.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => inner.stats.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self, error: &LlmError) {
        let mut inner = self.inner.lock().await;
        inner.stats.failure_count += 1;
        inner.stats.total_failures += 1;
        inner.stats.last_failure_at = Some(Instant::now());
        inner.stats.last_failure_error = Some(error.to_string());
        inner.stats.success_count = 0;

        match inner.state {
            CircuitState::Closed => {
                if inner.stats.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        let old = inner.state;
        inner.state = new_state;
        match new_state {
            CircuitState::Closed => {
                inner.stats.failure_count = 0;
                inner.stats.success_count = 0;
            }
            CircuitState::HalfOpen => inner.stats.success_count = 0,
            CircuitState::Open => inner.stats.total_opens += 1,
        }
        warn!(
            circuit = %self.name,
            from = old.as_str(),
            to = new_state.as_str(),
            "circuit breaker transitioned"
        );
    }

    /// Snapshot for monitoring endpoints.
    pub async fn status(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        serde_json::json!({
            "name": self.name,
            "state": inner.state.as_str(),
            "failure_count": inner.stats.failure_count,
            "success_count": inner.stats.success_count,
            "total_requests": inner.stats.total_requests,
            "total_failures": inner.stats.total_failures,
            "total_successes": inner.stats.total_successes,
            "total_opens": inner.stats.total_opens,
            "last_failure_error": inner.stats.last_failure_error,
        })
    }
}

/// Registry of circuit breakers keyed `{component}-{llm_config_name}`.
///
/// Passed explicitly to the agent runtime; creation is safe against
/// double-init because the map's entry lock covers get-or-create.
#[derive(Default)]
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.get(name).map(|c| c.clone())
    }

    pub async fn all_states(&self) -> Vec<(String, CircuitState)> {
        let mut out = Vec::new();
        for entry in self.circuits.iter() {
            out.push((entry.key().clone(), entry.value().state().await));
        }
        out
    }
}
