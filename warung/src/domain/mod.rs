//! Domain entities and value objects.
//!
//! State machines (conversation, order, payment, job) reject illegal
//! transitions instead of relying on callers to check; that is what makes
//! last-write-wins acceptable everywhere else. Entities produce
//! [`DomainEvent`] values; publishing them on the event exchange is the
//! application layer's job.

mod conversation;
mod customer;
mod event;
mod job;
mod label;
mod order;
mod product;
mod tenant;

pub use conversation::{Conversation, ConversationMessage, ConversationState, HISTORY_CAP, LLM_HISTORY};
pub use customer::Customer;
pub use event::{DomainEvent, EventSink, NullEventSink};
pub use job::{Job, JobStatus};
pub use label::Label;
pub use order::{Money, Order, OrderItem, OrderStatus, PaymentRecord, PaymentStatus};
pub use product::{Product, ProductVariant};
pub use tenant::Tenant;
