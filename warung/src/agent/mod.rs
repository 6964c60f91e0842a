//! The agent runtime: a small directed graph over [`AgentState`].
//!
//! ```text
//!  start → moderation → router → ┬→ main ────→ ok? ── yes ─→ END
//!                                │             │no
//!                                ├→ followup ──┤ (same check)
//!                                └→ fallback ──┴───────────→ END
//! ```
//!
//! The node set is fixed, so the graph is code: a routing function plus one
//! implementation per node, not a graph library. Every LLM call goes through
//! the resilience sandwich (circuit breaker, timeout, retry); the runner
//! adds graph-level backoff on top and guarantees that *some* response comes
//! out the bottom no matter what fails.

mod nodes;
mod runner;
mod state;

pub use runner::{AgentOutcome, AgentRequest, AgentRunner};
pub use state::{AgentState, AgentType, ModerationVerdict};
