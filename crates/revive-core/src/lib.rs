//! Revive Core Library
//!
//! Follow-up and reminder execution engine: polls the queue, checks each
//! item against live state, personalizes the message within the company's
//! credit budget and delivers it through the messaging gateway.

pub mod business_hours;
pub mod config;
pub mod credits;
pub mod driver;
pub mod guard;
pub mod llm;
pub mod messenger;
pub mod models;
pub mod notify;
pub mod orphans;
pub mod personalize;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod stats;
pub mod status;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use config::Config;
pub use driver::{ExecutionDriver, Outcome};
pub use queue::{QueueItem, QueueKind, QueueStatus};
pub use scheduler::{spawn_scheduler, PollScheduler, SchedulerSettings};
pub use store::{PgStore, Store};
