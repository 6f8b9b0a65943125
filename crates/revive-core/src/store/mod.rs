//! Storage interface
//!
//! Everything the engine reads or writes goes through [`Store`]. The
//! production implementation is [`PgStore`] (Diesel over PostgreSQL);
//! tests use an in-memory implementation.
//!
//! Mutations are targeted by id and touch only the columns they own, so
//! concurrent writers do not clobber each other's fields.

mod pg;

pub use pg::PgStore;

#[cfg(test)]
pub(crate) mod memory;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{
    Agent, Appointment, ChannelInstance, Contact, Conversation, ConversationMessage,
    ExecutionLog, NotificationKind, OrphanCandidate,
};
use crate::queue::{ItemNote, NewOrphanItem, QueueItem, QueueStatus};

pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Pending items with `scheduled_at <= now`, oldest first
    fn pending_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>>;

    fn get_item(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// Take a lease on a pending item. Returns false when the item is no
    /// longer pending or another worker holds an unexpired lease.
    fn claim_item(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<bool>;

    /// Terminal success: status=sent, attempts+1, executed_at, message
    fn mark_sent(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<()>;

    /// Count one failed attempt. The item stays pending unless the attempt
    /// cap is reached. Returns the resulting status.
    fn record_failed_attempt(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus>;

    /// Move a pending item to `failed` or `cancelled` without counting an attempt
    fn terminate_item(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
        note: ItemNote,
    ) -> Result<()>;

    /// Push `scheduled_at` forward, leaving status and attempts untouched
    fn reschedule_item(&self, id: Uuid, scheduled_at: DateTime<Utc>, note: ItemNote)
        -> Result<()>;

    fn set_item_company(&self, id: Uuid, company_id: Uuid) -> Result<()>;

    /// Fail every item still pending and created before `horizon`
    fn sweep_stale_items(&self, horizon: DateTime<Utc>, note: ItemNote) -> Result<usize>;

    /// Any item, in any status, for the (conversation, rule) pair
    fn item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool>;

    fn sent_item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool>;

    /// Insert a backdated pending item unless one already exists for the
    /// pair. Returns the new item, or None when the insert was refused.
    fn create_orphan_item(&self, item: &NewOrphanItem) -> Result<Option<QueueItem>>;

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    fn get_agent(&self, id: Uuid) -> Result<Option<Agent>>;

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    fn get_contact(&self, id: Uuid) -> Result<Option<Contact>>;

    /// Last `limit` messages, oldest first
    fn recent_messages(&self, conversation_id: Uuid, limit: i64)
        -> Result<Vec<ConversationMessage>>;

    fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>>;

    fn company_timezone(&self, company_id: Uuid) -> Result<Option<String>>;

    fn set_conversation_thread(&self, conversation_id: Uuid, thread_id: &str) -> Result<()>;

    /// Open conversations with an active AI agent whose last message is
    /// newer than `since`
    fn orphan_candidates(&self, since: DateTime<Utc>) -> Result<Vec<OrphanCandidate>>;

    fn active_channel_instance(&self, company_id: Uuid) -> Result<Option<ChannelInstance>>;

    fn insert_outbound_message(
        &self,
        conversation_id: Uuid,
        company_id: Uuid,
        content: &str,
        external_id: Option<&str>,
    ) -> Result<Uuid>;

    // ------------------------------------------------------------------
    // Credits, audit, notifications
    // ------------------------------------------------------------------

    fn credit_balance(&self, company_id: Uuid) -> Result<Option<i64>>;

    /// Atomically decrement the balance and record the transaction.
    /// Returns the balance after the debit.
    fn debit_credits(
        &self,
        company_id: Uuid,
        amount: i64,
        description: &str,
        context: &serde_json::Value,
    ) -> Result<i64>;

    fn insert_execution_log(&self, log: &ExecutionLog) -> Result<()>;

    fn insert_notification(
        &self,
        company_id: Uuid,
        kind: NotificationKind,
        title: &str,
        body: &str,
    ) -> Result<()>;

    /// Cheap round trip for readiness checks
    fn ping(&self) -> Result<()>;
}
