//! PostgreSQL storage using Diesel
//!
//! Queue, conversation, credit and audit tables. The stored functions
//! created by the migrations (`pending_queue_items`,
//! `create_orphan_queue_item`, `sweep_stale_queue_items`, `debit_credits`)
//! are called through raw SQL.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

use super::Store;
use crate::models::{
    Agent, AgentStatus, Appointment, ChannelInstance, Contact, Conversation,
    ConversationMessage, Direction, ExecutionLog, NotificationKind, OrphanCandidate, Rule,
};
use crate::queue::{parse_notes, ItemNote, NewOrphanItem, QueueItem, QueueKind, QueueStatus};
use crate::schema::{
    agents, appointments, channel_instances, companies, contacts, conversations,
    credit_balances, execution_logs, messages, notifications, queue_items,
};

const CONNECTED_INSTANCE_STATUSES: [&str; 3] = ["connected", "open", "active"];

// ============================================================================
// Rows
// ============================================================================

#[derive(Queryable, Selectable, QueryableByName, Debug)]
#[diesel(table_name = queue_items)]
struct QueueItemRow {
    id: Uuid,
    kind: String,
    agent_id: Uuid,
    conversation_id: Option<Uuid>,
    appointment_id: Option<Uuid>,
    contact_id: Option<Uuid>,
    company_id: Option<Uuid>,
    rule_id: String,
    rule_name: String,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    status: String,
    attempts: i32,
    max_attempts: i32,
    executed_at: Option<DateTime<Utc>>,
    execution_error: Option<String>,
    generated_message: Option<String>,
    message_template: String,
    notes: serde_json::Value,
    claimed_at: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = anyhow::Error;

    fn try_from(row: QueueItemRow) -> Result<Self> {
        Ok(QueueItem {
            id: row.id,
            kind: QueueKind::from_str(&row.kind)?,
            agent_id: row.agent_id,
            conversation_id: row.conversation_id,
            appointment_id: row.appointment_id,
            contact_id: row.contact_id,
            company_id: row.company_id,
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            status: QueueStatus::from_str(&row.status)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            executed_at: row.executed_at,
            execution_error: row.execution_error,
            generated_message: row.generated_message,
            message_template: row.message_template,
            notes: parse_notes(row.notes)?,
            claimed_at: row.claimed_at,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = agents)]
struct AgentRow {
    id: Uuid,
    company_id: Uuid,
    name: String,
    status: String,
    assistant_id: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    tone: Option<String>,
    language: Option<String>,
    rules: serde_json::Value,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        let rules = match row.rules {
            serde_json::Value::Array(entries) => entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<Rule>(entry) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        warn!("Skipping malformed rule on agent {}: {}", row.id, e);
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        Agent {
            id: row.id,
            company_id: row.company_id,
            name: row.name,
            status: AgentStatus::from_str(&row.status).unwrap_or(AgentStatus::Inactive),
            assistant_id: row.assistant_id.filter(|a| !a.is_empty()),
            model: row.model.filter(|m| !m.is_empty()),
            temperature: row.temperature,
            tone: row.tone,
            language: row.language,
            rules,
        }
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = conversations)]
struct ConversationRow {
    id: Uuid,
    company_id: Uuid,
    contact_id: Uuid,
    agent_id: Option<Uuid>,
    status: String,
    ai_enabled: bool,
    ai_paused: bool,
    assigned_user_id: Option<Uuid>,
    metadata: serde_json::Value,
    thread_id: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            company_id: row.company_id,
            contact_id: row.contact_id,
            agent_id: row.agent_id,
            status: row.status,
            ai_enabled: row.ai_enabled,
            ai_paused: row.ai_paused,
            assigned_user_id: row.assigned_user_id,
            metadata: row.metadata,
            thread_id: row.thread_id,
            last_message_at: row.last_message_at,
        }
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = contacts)]
struct ContactRow {
    id: Uuid,
    company_id: Uuid,
    name: Option<String>,
    phone: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = messages)]
struct MessageRow {
    id: Uuid,
    direction: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ConversationMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ConversationMessage {
            id: row.id,
            direction: Direction::from_str(&row.direction)?,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = appointments)]
struct AppointmentRow {
    id: Uuid,
    company_id: Uuid,
    contact_id: Uuid,
    title: String,
    starts_at: DateTime<Utc>,
    location: Option<String>,
    status: String,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessage<'a> {
    id: Uuid,
    conversation_id: Uuid,
    company_id: Uuid,
    direction: &'a str,
    sender_type: &'a str,
    content: &'a str,
    external_id: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = execution_logs)]
struct NewExecutionLog<'a> {
    id: Uuid,
    queue_item_id: Uuid,
    kind: &'a str,
    agent_id: Uuid,
    conversation_id: Option<Uuid>,
    appointment_id: Option<Uuid>,
    company_id: Option<Uuid>,
    rule_name: &'a str,
    success: bool,
    error_message: Option<&'a str>,
    response_time_ms: i64,
    message_sent: &'a str,
    side_effect: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
struct NewNotification<'a> {
    id: Uuid,
    company_id: Uuid,
    kind: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(QueryableByName, Debug)]
struct StatusRow {
    #[diesel(sql_type = Text)]
    status: String,
}

#[derive(QueryableByName, Debug)]
struct SweptRow {
    #[diesel(sql_type = BigInt)]
    swept: i64,
}

#[derive(QueryableByName, Debug)]
struct BalanceRow {
    #[diesel(sql_type = BigInt)]
    balance: i64,
}

// ============================================================================
// Store
// ============================================================================

pub struct PgStore {
    conn: Arc<Mutex<PgConnection>>,
}

impl PgStore {
    /// Create a new PgStore with a shared connection
    pub fn new(conn: Arc<Mutex<PgConnection>>) -> Self {
        Self { conn }
    }

    /// Create a new PgStore with its own connection
    pub fn connect(db_url: &str) -> Result<Self> {
        let conn = PgConnection::establish(db_url).context("Failed to connect to database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, PgConnection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

fn load_agent(conn: &mut PgConnection, id: Uuid) -> Result<Option<Agent>> {
    let row: Option<AgentRow> = agents::table
        .filter(agents::id.eq(id))
        .select(AgentRow::as_select())
        .first(conn)
        .optional()
        .context("Failed to query agent")?;
    Ok(row.map(Agent::from))
}

fn last_message_direction(conn: &mut PgConnection, conversation_id: Uuid) -> Result<Option<Direction>> {
    let direction: Option<String> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order(messages::created_at.desc())
        .select(messages::direction)
        .first(conn)
        .optional()
        .context("Failed to query last message")?;
    direction.map(|d| Direction::from_str(&d)).transpose()
}

fn note_array(note: &ItemNote) -> Result<serde_json::Value> {
    Ok(serde_json::Value::Array(vec![serde_json::to_value(note)?]))
}

impl Store for PgStore {
    fn pending_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let mut conn = self.conn()?;

        let rows: Vec<QueueItemRow> =
            diesel::sql_query("SELECT * FROM pending_queue_items($1, $2)")
                .bind::<Timestamptz, _>(now)
                .bind::<BigInt, _>(limit)
                .load(&mut *conn)
                .context("Failed to query pending queue items")?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    fn get_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let mut conn = self.conn()?;

        let row: Option<QueueItemRow> = queue_items::table
            .filter(queue_items::id.eq(id))
            .select(QueueItemRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("Failed to query queue item")?;

        row.map(QueueItem::try_from).transpose()
    }

    fn claim_item(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<bool> {
        let mut conn = self.conn()?;
        let lease_cutoff = now - lease;

        let updated = diesel::update(
            queue_items::table
                .filter(queue_items::id.eq(id))
                .filter(queue_items::status.eq(QueueStatus::Pending.as_str()))
                .filter(
                    queue_items::claimed_at
                        .is_null()
                        .or(queue_items::claimed_at.lt(lease_cutoff)),
                ),
        )
        .set((
            queue_items::claimed_at.eq(Some(now)),
            queue_items::updated_at.eq(now),
        ))
        .execute(&mut *conn)
        .context("Failed to claim queue item")?;

        Ok(updated > 0)
    }

    fn mark_sent(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            queue_items::table
                .filter(queue_items::id.eq(id))
                .filter(queue_items::status.eq(QueueStatus::Pending.as_str())),
        )
        .set((
            queue_items::status.eq(QueueStatus::Sent.as_str()),
            queue_items::attempts.eq(queue_items::attempts + 1),
            queue_items::executed_at.eq(Some(now)),
            queue_items::generated_message.eq(Some(message)),
            queue_items::execution_error.eq(None::<String>),
            queue_items::claimed_at.eq(None::<DateTime<Utc>>),
            queue_items::updated_at.eq(now),
        ))
        .execute(&mut *conn)
        .context("Failed to mark queue item as sent")?;

        if updated == 0 {
            anyhow::bail!("Queue item {} was no longer pending when marking sent", id);
        }
        Ok(())
    }

    fn record_failed_attempt(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus> {
        let mut conn = self.conn()?;

        let row: Option<StatusRow> = diesel::sql_query(
            "UPDATE queue_items \
             SET attempts = attempts + 1, \
                 status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END, \
                 execution_error = $2, \
                 claimed_at = NULL, \
                 updated_at = $3 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING status",
        )
        .bind::<SqlUuid, _>(id)
        .bind::<Text, _>(error)
        .bind::<Timestamptz, _>(now)
        .get_result(&mut *conn)
        .optional()
        .context("Failed to record failed attempt")?;

        let status = match row {
            Some(row) => row.status,
            None => queue_items::table
                .filter(queue_items::id.eq(id))
                .select(queue_items::status)
                .first::<String>(&mut *conn)
                .context("Failed to re-read queue item status")?,
        };

        QueueStatus::from_str(&status)
    }

    fn terminate_item(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
        note: ItemNote,
    ) -> Result<()> {
        if !matches!(status, QueueStatus::Failed | QueueStatus::Cancelled) {
            anyhow::bail!("terminate_item only accepts failed or cancelled, got {}", status);
        }

        let mut conn = self.conn()?;

        diesel::sql_query(
            "UPDATE queue_items \
             SET status = $2, \
                 execution_error = COALESCE($3, execution_error), \
                 notes = notes || $4, \
                 claimed_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind::<SqlUuid, _>(id)
        .bind::<Text, _>(status.as_str())
        .bind::<Nullable<Text>, _>(error)
        .bind::<Jsonb, _>(note_array(&note)?)
        .execute(&mut *conn)
        .context("Failed to terminate queue item")?;

        Ok(())
    }

    fn reschedule_item(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        note: ItemNote,
    ) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::sql_query(
            "UPDATE queue_items \
             SET scheduled_at = $2, \
                 notes = notes || $3, \
                 claimed_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind::<SqlUuid, _>(id)
        .bind::<Timestamptz, _>(scheduled_at)
        .bind::<Jsonb, _>(note_array(&note)?)
        .execute(&mut *conn)
        .context("Failed to reschedule queue item")?;

        Ok(())
    }

    fn set_item_company(&self, id: Uuid, company_id: Uuid) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::update(queue_items::table.filter(queue_items::id.eq(id)))
            .set((
                queue_items::company_id.eq(Some(company_id)),
                queue_items::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .context("Failed to backfill queue item company")?;

        Ok(())
    }

    fn sweep_stale_items(&self, horizon: DateTime<Utc>, note: ItemNote) -> Result<usize> {
        let mut conn = self.conn()?;

        let row: SweptRow = diesel::sql_query("SELECT sweep_stale_queue_items($1, $2) AS swept")
            .bind::<Timestamptz, _>(horizon)
            .bind::<Jsonb, _>(serde_json::to_value(&note)?)
            .get_result(&mut *conn)
            .context("Failed to sweep stale queue items")?;

        Ok(row.swept.max(0) as usize)
    }

    fn item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;

        let exists: bool = diesel::dsl::select(diesel::dsl::exists(
            queue_items::table
                .filter(queue_items::conversation_id.eq(conversation_id))
                .filter(queue_items::rule_id.eq(rule_id)),
        ))
        .get_result(&mut *conn)
        .context("Failed to check queue item existence")?;

        Ok(exists)
    }

    fn sent_item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;

        let exists: bool = diesel::dsl::select(diesel::dsl::exists(
            queue_items::table
                .filter(queue_items::conversation_id.eq(conversation_id))
                .filter(queue_items::rule_id.eq(rule_id))
                .filter(queue_items::status.eq(QueueStatus::Sent.as_str())),
        ))
        .get_result(&mut *conn)
        .context("Failed to check sent queue item")?;

        Ok(exists)
    }

    fn create_orphan_item(&self, item: &NewOrphanItem) -> Result<Option<QueueItem>> {
        let mut conn = self.conn()?;

        let rows: Vec<QueueItemRow> = diesel::sql_query(
            "SELECT * FROM create_orphan_queue_item($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind::<SqlUuid, _>(Uuid::new_v4())
        .bind::<SqlUuid, _>(item.agent_id)
        .bind::<SqlUuid, _>(item.conversation_id)
        .bind::<SqlUuid, _>(item.contact_id)
        .bind::<SqlUuid, _>(item.company_id)
        .bind::<Text, _>(&item.rule_id)
        .bind::<Text, _>(&item.rule_name)
        .bind::<Timestamptz, _>(item.scheduled_at)
        .bind::<Integer, _>(item.max_attempts)
        .bind::<Text, _>(&item.message_template)
        .bind::<Jsonb, _>(note_array(&item.note)?)
        .load(&mut *conn)
        .context("Failed to create orphan queue item")?;

        rows.into_iter().next().map(QueueItem::try_from).transpose()
    }

    fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let mut conn = self.conn()?;
        load_agent(&mut conn, id)
    }

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let mut conn = self.conn()?;

        let row: Option<ConversationRow> = conversations::table
            .filter(conversations::id.eq(id))
            .select(ConversationRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("Failed to query conversation")?;

        Ok(row.map(Conversation::from))
    }

    fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        let mut conn = self.conn()?;

        let row: Option<ContactRow> = contacts::table
            .filter(contacts::id.eq(id))
            .select(ContactRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("Failed to query contact")?;

        Ok(row.map(|r| Contact {
            id: r.id,
            company_id: r.company_id,
            name: r.name,
            phone: r.phone,
        }))
    }

    fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConversationMessage>> {
        let mut conn = self.conn()?;

        let mut rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::created_at.desc())
            .limit(limit)
            .select(MessageRow::as_select())
            .load(&mut *conn)
            .context("Failed to query recent messages")?;

        // Reverse to get chronological order
        rows.reverse();
        rows.into_iter().map(ConversationMessage::try_from).collect()
    }

    fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        let mut conn = self.conn()?;

        let row: Option<AppointmentRow> = appointments::table
            .filter(appointments::id.eq(id))
            .select(AppointmentRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("Failed to query appointment")?;

        Ok(row.map(|r| Appointment {
            id: r.id,
            company_id: r.company_id,
            contact_id: r.contact_id,
            title: r.title,
            starts_at: r.starts_at,
            location: r.location,
            status: r.status,
        }))
    }

    fn company_timezone(&self, company_id: Uuid) -> Result<Option<String>> {
        let mut conn = self.conn()?;

        let tz: Option<Option<String>> = companies::table
            .filter(companies::id.eq(company_id))
            .select(companies::timezone)
            .first(&mut *conn)
            .optional()
            .context("Failed to query company timezone")?;

        Ok(tz.flatten().filter(|t| !t.is_empty()))
    }

    fn set_conversation_thread(&self, conversation_id: Uuid, thread_id: &str) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
            .set(conversations::thread_id.eq(Some(thread_id)))
            .execute(&mut *conn)
            .context("Failed to cache conversation thread")?;

        Ok(())
    }

    fn orphan_candidates(&self, since: DateTime<Utc>) -> Result<Vec<OrphanCandidate>> {
        let mut conn = self.conn()?;

        let rows: Vec<ConversationRow> = conversations::table
            .filter(conversations::status.ne("closed"))
            .filter(conversations::agent_id.is_not_null())
            .filter(conversations::ai_enabled.eq(true))
            .filter(conversations::ai_paused.eq(false))
            .filter(conversations::last_message_at.ge(since))
            .order(conversations::last_message_at.asc())
            .select(ConversationRow::as_select())
            .load(&mut *conn)
            .context("Failed to query orphan candidates")?;

        let mut agent_cache: HashMap<Uuid, Option<Agent>> = HashMap::new();
        let mut candidates = Vec::new();

        for row in rows {
            let (Some(agent_id), Some(last_message_at)) = (row.agent_id, row.last_message_at)
            else {
                continue;
            };

            let agent = match agent_cache.get(&agent_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = load_agent(&mut conn, agent_id)?;
                    agent_cache.insert(agent_id, loaded.clone());
                    loaded
                }
            };
            let Some(agent) = agent else { continue };
            if !agent.status.can_send() || agent.active_follow_up_rules().next().is_none() {
                continue;
            }

            let Some(direction) = last_message_direction(&mut conn, row.id)? else {
                continue;
            };

            candidates.push(OrphanCandidate {
                conversation_id: row.id,
                contact_id: row.contact_id,
                company_id: row.company_id,
                agent,
                last_message_at,
                last_message_direction: direction,
            });
        }

        Ok(candidates)
    }

    fn active_channel_instance(&self, company_id: Uuid) -> Result<Option<ChannelInstance>> {
        let mut conn = self.conn()?;

        let row: Option<(Uuid, Uuid, String)> = channel_instances::table
            .filter(channel_instances::company_id.eq(company_id))
            .filter(channel_instances::status.eq_any(CONNECTED_INSTANCE_STATUSES))
            .order(channel_instances::created_at.desc())
            .select((
                channel_instances::id,
                channel_instances::company_id,
                channel_instances::instance_name,
            ))
            .first(&mut *conn)
            .optional()
            .context("Failed to query channel instance")?;

        Ok(row.map(|(id, company_id, instance_name)| ChannelInstance {
            id,
            company_id,
            instance_name,
        }))
    }

    fn insert_outbound_message(
        &self,
        conversation_id: Uuid,
        company_id: Uuid,
        content: &str,
        external_id: Option<&str>,
    ) -> Result<Uuid> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(messages::table)
                .values(&NewMessage {
                    id,
                    conversation_id,
                    company_id,
                    direction: Direction::Outbound.as_str(),
                    sender_type: "agent",
                    content,
                    external_id,
                })
                .execute(conn)?;

            diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
                .set((
                    conversations::last_message_at.eq(Some(now)),
                    conversations::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(())
        })
        .context("Failed to insert outbound message")?;

        Ok(id)
    }

    fn credit_balance(&self, company_id: Uuid) -> Result<Option<i64>> {
        let mut conn = self.conn()?;

        let balance: Option<i64> = credit_balances::table
            .filter(credit_balances::company_id.eq(company_id))
            .select(credit_balances::balance)
            .first(&mut *conn)
            .optional()
            .context("Failed to query credit balance")?;

        Ok(balance)
    }

    fn debit_credits(
        &self,
        company_id: Uuid,
        amount: i64,
        description: &str,
        context: &serde_json::Value,
    ) -> Result<i64> {
        let mut conn = self.conn()?;

        let row: BalanceRow = diesel::sql_query("SELECT debit_credits($1, $2, $3, $4) AS balance")
            .bind::<SqlUuid, _>(company_id)
            .bind::<BigInt, _>(amount)
            .bind::<Text, _>(description)
            .bind::<Jsonb, _>(context.clone())
            .get_result(&mut *conn)
            .context("Failed to debit credits")?;

        Ok(row.balance)
    }

    fn insert_execution_log(&self, log: &ExecutionLog) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::insert_into(execution_logs::table)
            .values(&NewExecutionLog {
                id: Uuid::new_v4(),
                queue_item_id: log.queue_item_id,
                kind: log.kind.as_str(),
                agent_id: log.agent_id,
                conversation_id: log.conversation_id,
                appointment_id: log.appointment_id,
                company_id: log.company_id,
                rule_name: &log.rule_name,
                success: log.success,
                error_message: log.error_message.as_deref(),
                response_time_ms: log.response_time_ms,
                message_sent: &log.message_sent,
                side_effect: log.side_effect.as_deref(),
            })
            .execute(&mut *conn)
            .context("Failed to insert execution log")?;

        Ok(())
    }

    fn insert_notification(
        &self,
        company_id: Uuid,
        kind: NotificationKind,
        title: &str,
        body: &str,
    ) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::insert_into(notifications::table)
            .values(&NewNotification {
                id: Uuid::new_v4(),
                company_id,
                kind: kind.as_str(),
                title,
                body,
            })
            .execute(&mut *conn)
            .context("Failed to insert notification")?;

        Ok(())
    }

    fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1")
            .execute(&mut *conn)
            .context("Database ping failed")?;
        Ok(())
    }
}
