//! In-memory [`Store`] for tests, with switches for fault injection.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Store;
use crate::models::{
    Agent, Appointment, ChannelInstance, Contact, Conversation, ConversationMessage, Direction,
    ExecutionLog, NotificationKind, OrphanCandidate,
};
use crate::queue::{ItemNote, NewOrphanItem, QueueItem, QueueKind, QueueStatus};

#[derive(Default)]
pub struct MemoryState {
    pub items: HashMap<Uuid, QueueItem>,
    pub agents: HashMap<Uuid, Agent>,
    pub conversations: HashMap<Uuid, Conversation>,
    pub contacts: HashMap<Uuid, Contact>,
    pub messages: HashMap<Uuid, Vec<ConversationMessage>>,
    pub appointments: HashMap<Uuid, Appointment>,
    pub timezones: HashMap<Uuid, String>,
    pub channels: HashMap<Uuid, ChannelInstance>,
    pub balances: HashMap<Uuid, i64>,
    pub debits: Vec<(Uuid, i64, String)>,
    pub logs: Vec<ExecutionLog>,
    pub notifications: Vec<(Uuid, NotificationKind, String)>,
    pub outbound: Vec<(Uuid, String)>,

    pub fail_pending_query: bool,
    pub fail_mark_sent: bool,
    pub fail_log_insert: bool,
    pub fail_balance_query: bool,
    /// Balance reported after a debit is off by this much
    pub debit_drift: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn item(&self, id: Uuid) -> QueueItem {
        self.state().items[&id].clone()
    }

    pub fn insert_item(&self, item: QueueItem) {
        self.state().items.insert(item.id, item);
    }
}

impl Store for MemoryStore {
    fn pending_items(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let state = self.state();
        if state.fail_pending_query {
            anyhow::bail!("pending query failed");
        }
        let mut items: Vec<QueueItem> = state
            .items
            .values()
            .filter(|i| i.status == QueueStatus::Pending && i.scheduled_at <= now)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.scheduled_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    fn get_item(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.state().items.get(&id).cloned())
    }

    fn claim_item(&self, id: Uuid, now: DateTime<Utc>, lease: Duration) -> Result<bool> {
        let mut state = self.state();
        let Some(item) = state.items.get_mut(&id) else {
            return Ok(false);
        };
        let free = item.claimed_at.map_or(true, |at| at < now - lease);
        if item.status != QueueStatus::Pending || !free {
            return Ok(false);
        }
        item.claimed_at = Some(now);
        Ok(true)
    }

    fn mark_sent(&self, id: Uuid, message: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        if state.fail_mark_sent {
            anyhow::bail!("connection reset");
        }
        let item = state
            .items
            .get_mut(&id)
            .filter(|i| i.status == QueueStatus::Pending)
            .ok_or_else(|| anyhow::anyhow!("item {} not pending", id))?;
        item.status = QueueStatus::Sent;
        item.attempts += 1;
        item.executed_at = Some(now);
        item.generated_message = Some(message.to_string());
        item.execution_error = None;
        item.claimed_at = None;
        Ok(())
    }

    fn record_failed_attempt(
        &self,
        id: Uuid,
        error: &str,
        _now: DateTime<Utc>,
    ) -> Result<QueueStatus> {
        let mut state = self.state();
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("item {} not found", id))?;
        if item.status == QueueStatus::Pending {
            item.status = item.status_after_failure();
            item.attempts += 1;
            item.execution_error = Some(error.to_string());
            item.claimed_at = None;
        }
        Ok(item.status)
    }

    fn terminate_item(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
        note: ItemNote,
    ) -> Result<()> {
        let mut state = self.state();
        if let Some(item) = state.items.get_mut(&id) {
            if item.status == QueueStatus::Pending {
                item.status = status;
                if let Some(error) = error {
                    item.execution_error = Some(error.to_string());
                }
                item.notes.push(note);
                item.claimed_at = None;
            }
        }
        Ok(())
    }

    fn reschedule_item(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        note: ItemNote,
    ) -> Result<()> {
        let mut state = self.state();
        if let Some(item) = state.items.get_mut(&id) {
            if item.status == QueueStatus::Pending {
                item.scheduled_at = scheduled_at;
                item.notes.push(note);
                item.claimed_at = None;
            }
        }
        Ok(())
    }

    fn set_item_company(&self, id: Uuid, company_id: Uuid) -> Result<()> {
        if let Some(item) = self.state().items.get_mut(&id) {
            item.company_id = Some(company_id);
        }
        Ok(())
    }

    fn sweep_stale_items(&self, horizon: DateTime<Utc>, note: ItemNote) -> Result<usize> {
        let mut state = self.state();
        let mut swept = 0;
        for item in state.items.values_mut() {
            if item.status == QueueStatus::Pending
                && item.created_at < horizon
                && item.scheduled_at < horizon
            {
                item.status = QueueStatus::Failed;
                item.notes.push(note.clone());
                swept += 1;
            }
        }
        Ok(swept)
    }

    fn item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool> {
        Ok(self
            .state()
            .items
            .values()
            .any(|i| i.conversation_id == Some(conversation_id) && i.rule_id == rule_id))
    }

    fn sent_item_exists_for_rule(&self, conversation_id: Uuid, rule_id: &str) -> Result<bool> {
        Ok(self.state().items.values().any(|i| {
            i.conversation_id == Some(conversation_id)
                && i.rule_id == rule_id
                && i.status == QueueStatus::Sent
        }))
    }

    fn create_orphan_item(&self, new: &NewOrphanItem) -> Result<Option<QueueItem>> {
        let mut state = self.state();
        if state
            .items
            .values()
            .any(|i| i.conversation_id == Some(new.conversation_id) && i.rule_id == new.rule_id)
        {
            return Ok(None);
        }

        let item = QueueItem {
            id: Uuid::new_v4(),
            kind: QueueKind::FollowUp,
            agent_id: new.agent_id,
            conversation_id: Some(new.conversation_id),
            appointment_id: None,
            contact_id: Some(new.contact_id),
            company_id: Some(new.company_id),
            rule_id: new.rule_id.clone(),
            rule_name: new.rule_name.clone(),
            scheduled_at: new.scheduled_at,
            created_at: Utc::now(),
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            executed_at: None,
            execution_error: None,
            generated_message: None,
            message_template: new.message_template.clone(),
            notes: vec![new.note.clone()],
            claimed_at: None,
        };
        state.items.insert(item.id, item.clone());
        Ok(Some(item))
    }

    fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self.state().agents.get(&id).cloned())
    }

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.state().conversations.get(&id).cloned())
    }

    fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        Ok(self.state().contacts.get(&id).cloned())
    }

    fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConversationMessage>> {
        let state = self.state();
        let all = state.messages.get(&conversation_id).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(limit.max(0) as usize);
        Ok(all.into_iter().skip(skip).collect())
    }

    fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.state().appointments.get(&id).cloned())
    }

    fn company_timezone(&self, company_id: Uuid) -> Result<Option<String>> {
        Ok(self.state().timezones.get(&company_id).cloned())
    }

    fn set_conversation_thread(&self, conversation_id: Uuid, thread_id: &str) -> Result<()> {
        if let Some(conv) = self.state().conversations.get_mut(&conversation_id) {
            conv.thread_id = Some(thread_id.to_string());
        }
        Ok(())
    }

    fn orphan_candidates(&self, since: DateTime<Utc>) -> Result<Vec<OrphanCandidate>> {
        let state = self.state();
        let mut candidates = Vec::new();
        for conv in state.conversations.values() {
            if !conv.is_open() || !conv.ai_enabled || conv.ai_paused {
                continue;
            }
            let (Some(agent_id), Some(last_at)) = (conv.agent_id, conv.last_message_at) else {
                continue;
            };
            if last_at < since {
                continue;
            }
            let Some(agent) = state.agents.get(&agent_id) else {
                continue;
            };
            if !agent.status.can_send() {
                continue;
            }
            let direction = state
                .messages
                .get(&conv.id)
                .and_then(|m| m.last())
                .map(|m| m.direction)
                .unwrap_or(Direction::Outbound);
            candidates.push(OrphanCandidate {
                conversation_id: conv.id,
                contact_id: conv.contact_id,
                company_id: conv.company_id,
                agent: agent.clone(),
                last_message_at: last_at,
                last_message_direction: direction,
            });
        }
        Ok(candidates)
    }

    fn active_channel_instance(&self, company_id: Uuid) -> Result<Option<ChannelInstance>> {
        Ok(self.state().channels.get(&company_id).cloned())
    }

    fn insert_outbound_message(
        &self,
        conversation_id: Uuid,
        _company_id: Uuid,
        content: &str,
        _external_id: Option<&str>,
    ) -> Result<Uuid> {
        self.state()
            .outbound
            .push((conversation_id, content.to_string()));
        Ok(Uuid::new_v4())
    }

    fn credit_balance(&self, company_id: Uuid) -> Result<Option<i64>> {
        let state = self.state();
        if state.fail_balance_query {
            anyhow::bail!("ledger unavailable");
        }
        Ok(state.balances.get(&company_id).copied())
    }

    fn debit_credits(
        &self,
        company_id: Uuid,
        amount: i64,
        description: &str,
        _context: &serde_json::Value,
    ) -> Result<i64> {
        let mut state = self.state();
        let drift = state.debit_drift;
        let balance = state
            .balances
            .get_mut(&company_id)
            .ok_or_else(|| anyhow::anyhow!("no credit balance for company {}", company_id))?;
        *balance -= amount + drift;
        let after = *balance;
        state
            .debits
            .push((company_id, amount, description.to_string()));
        Ok(after)
    }

    fn insert_execution_log(&self, log: &ExecutionLog) -> Result<()> {
        let mut state = self.state();
        if state.fail_log_insert {
            anyhow::bail!("audit table locked");
        }
        state.logs.push(log.clone());
        Ok(())
    }

    fn insert_notification(
        &self,
        company_id: Uuid,
        kind: NotificationKind,
        _title: &str,
        body: &str,
    ) -> Result<()> {
        self.state()
            .notifications
            .push((company_id, kind, body.to_string()));
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}
