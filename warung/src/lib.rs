//! # warung
//!
//! Core of a multi-tenant, WhatsApp-facing commerce/CRM chatbot platform.
//! Customer messages arrive through a WhatsApp HTTP bridge webhook, are
//! deduplicated and buffered per chat, run through a tool-calling LLM agent
//! that can search products, manage orders and initiate payments, and go
//! back out as paced, sentence-split bubbles.
//!
//! ## Main modules
//!
//! - [`bus`]: RabbitMQ fabric — durable queues with DLX/DLQ, topic event
//!   exchange, TTL-based delayed redelivery, reconnecting supervisor.
//! - [`buffer`]: per-chat coalescing with a sliding deadline, plus the
//!   background flush worker.
//! - [`dedup`]: atomic set-if-absent message deduplication.
//! - [`agent`]: moderation → router → {main | followup | fallback} graph
//!   with a sequential tool-dispatch loop.
//! - [`resilience`]: circuit breakers, exponential backoff, timeouts.
//! - [`validate`]: response quality validation.
//! - [`outgoing`]: sentence splitting and paced publishing.
//! - [`tools`]: the tool registry and the product/order/customer/payment/
//!   label executors, gated by conversation state.
//! - [`domain`]: entities and their state machines; [`repo`]: Postgres
//!   repositories; [`convo`]: cache-backed conversation hot state.
//! - [`orchestrator`]: the flush callback that ties one user turn together.
//! - [`waha`] / [`payment`] / [`geocode`]: bridge, gateway and geocoding
//!   clients; [`jobs`]: cache-backed job records with delayed retries.
//!
//! Binaries live in the workspace: `gateway` (webhook ingress + jobs API),
//! `agent-worker` (task consumer + flush worker), `sender` (bridge egress).

pub mod agent;
pub mod buffer;
pub mod bus;
pub mod cache;
pub mod convo;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod geocode;
pub mod jobs;
pub mod llm;
pub mod orchestrator;
pub mod outgoing;
pub mod payment;
pub mod repo;
pub mod resilience;
pub mod settings;
pub mod tools;
pub mod validate;
pub mod waha;

pub use settings::Settings;
