//! Execution driver
//!
//! Runs one queue item end to end: guard, claim, context load,
//! personalization, channel lookup, send, and persistence. Every attempt
//! that gets past the guard leaves exactly one execution log row.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::business_hours::resolve_timezone;
use crate::guard::{Guard, SkipReason, Verdict};
use crate::messenger::Messenger;
use crate::models::{
    Agent, AppointmentContext, ConversationContext, ExecutionLog, MessageContext, ReminderType,
};
use crate::personalize::Personalizer;
use crate::queue::{CancelReason, FailReason, ItemNote, QueueItem, QueueKind, QueueStatus};
use crate::store::Store;

/// Conversation messages loaded for personalization
const CONTEXT_MESSAGES: i64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to load context: {0}")]
    Load(anyhow::Error),
    #[error("no active channel instance for company {0}")]
    NoChannel(Uuid),
    #[error("send failed: {0}")]
    Send(anyhow::Error),
    #[error("message sent but state not persisted: {0}")]
    Persist(anyhow::Error),
}

impl ExecutionError {
    /// Retrying cannot help
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionError::NoChannel(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Sent { message: String },
    Skipped(SkipReason),
    Deferred { until: DateTime<Utc> },
    Cancelled(CancelReason),
    Failed {
        error: String,
        /// Item reached `failed`; otherwise it stays pending for a retry
        terminal: bool,
    },
}

impl Outcome {
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Sent { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn deferred(&self) -> bool {
        matches!(self, Outcome::Deferred { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

struct Delivery {
    message: String,
    side_effect: &'static str,
}

pub struct ExecutionDriver {
    store: Arc<dyn Store>,
    guard: Arc<Guard>,
    personalizer: Arc<Personalizer>,
    messenger: Arc<dyn Messenger>,
    claim_lease: Duration,
    default_timezone: Tz,
}

impl ExecutionDriver {
    pub fn new(
        store: Arc<dyn Store>,
        guard: Arc<Guard>,
        personalizer: Arc<Personalizer>,
        messenger: Arc<dyn Messenger>,
        claim_lease: Duration,
        default_timezone: Tz,
    ) -> Self {
        Self {
            store,
            guard,
            personalizer,
            messenger,
            claim_lease,
            default_timezone,
        }
    }

    pub async fn execute(&self, item: &QueueItem) -> Outcome {
        let now = Utc::now();
        let started = Instant::now();

        let (item, agent) = match self.guard.evaluate(item, now) {
            Verdict::Proceed { item, agent } => (item, agent),
            Verdict::Skip(reason) => return Outcome::Skipped(reason),
            Verdict::Cancel(reason) => return self.cancel(item, reason, now),
            Verdict::Defer { until } => return self.defer(item, until),
            Verdict::Fail(reason) => {
                let outcome = self.fail(item, reason, now);
                self.write_log(item, None, &outcome, started, None);
                return outcome;
            }
        };

        match self.store.claim_item(item.id, now, self.claim_lease) {
            Ok(true) => {}
            Ok(false) => return Outcome::Skipped(SkipReason::ClaimedElsewhere),
            Err(e) => {
                warn!("Failed to claim item {}: {}", item.id, e);
                return Outcome::Skipped(SkipReason::StateUnavailable);
            }
        }

        let company_id = match item.company_id {
            Some(company_id) => company_id,
            None => {
                if let Err(e) = self.store.set_item_company(item.id, agent.company_id) {
                    warn!("Failed to backfill company for item {}: {}", item.id, e);
                }
                agent.company_id
            }
        };

        let (outcome, side_effect) = match self.deliver(&item, &agent, company_id).await {
            Ok(delivery) => {
                info!(
                    "Sent {} '{}' for item {}",
                    item.kind.as_str(),
                    item.rule_name,
                    item.id
                );
                (
                    Outcome::Sent {
                        message: delivery.message,
                    },
                    Some(delivery.side_effect),
                )
            }
            Err(e) => (self.record_failure(&item, e), None),
        };

        self.write_log(&item, Some(company_id), &outcome, started, side_effect);
        outcome
    }

    async fn deliver(
        &self,
        item: &QueueItem,
        agent: &Agent,
        company_id: Uuid,
    ) -> Result<Delivery, ExecutionError> {
        let context = self
            .load_context(item, agent, company_id)
            .map_err(ExecutionError::Load)?;

        let personalized = self
            .personalizer
            .personalize(item, agent, &context, Some(company_id))
            .await;

        let channel = self
            .store
            .active_channel_instance(company_id)
            .map_err(ExecutionError::Load)?
            .ok_or(ExecutionError::NoChannel(company_id))?;

        let message_id = self
            .messenger
            .send_message(
                &channel.instance_name,
                &context.contact().phone,
                &personalized.text,
            )
            .await
            .map_err(ExecutionError::Send)?;

        if let Err(e) = self.store.mark_sent(item.id, &personalized.text, Utc::now()) {
            error!(
                "CRITICAL: item {} was delivered ({}) but could not be marked sent: {}",
                item.id,
                message_id.as_deref().unwrap_or("no message id"),
                e
            );
            return Err(ExecutionError::Persist(e));
        }

        let side_effect = match &context {
            MessageContext::FollowUp(conversation) => {
                if let Err(e) = self.store.insert_outbound_message(
                    conversation.conversation.id,
                    company_id,
                    &personalized.text,
                    message_id.as_deref(),
                ) {
                    warn!(
                        "Failed to record outbound message for conversation {}: {}",
                        conversation.conversation.id, e
                    );
                }
                "conversation_reactivated"
            }
            MessageContext::Reminder(_) => "reminder_sent",
        };

        Ok(Delivery {
            message: personalized.text,
            side_effect,
        })
    }

    fn load_context(
        &self,
        item: &QueueItem,
        agent: &Agent,
        company_id: Uuid,
    ) -> anyhow::Result<MessageContext> {
        match item.kind {
            QueueKind::FollowUp => {
                let conversation_id = item
                    .conversation_id
                    .ok_or_else(|| anyhow::anyhow!("follow-up item has no conversation"))?;
                let conversation = self
                    .store
                    .get_conversation(conversation_id)?
                    .ok_or_else(|| anyhow::anyhow!("conversation {} not found", conversation_id))?;
                let contact_id = item.contact_id.unwrap_or(conversation.contact_id);
                let contact = self
                    .store
                    .get_contact(contact_id)?
                    .ok_or_else(|| anyhow::anyhow!("contact {} not found", contact_id))?;
                let messages = self.store.recent_messages(conversation_id, CONTEXT_MESSAGES)?;
                Ok(MessageContext::FollowUp(ConversationContext::new(
                    conversation,
                    contact,
                    messages,
                    Utc::now(),
                )))
            }
            QueueKind::Reminder => {
                let appointment_id = item
                    .appointment_id
                    .ok_or_else(|| anyhow::anyhow!("reminder item has no appointment"))?;
                let appointment = self
                    .store
                    .get_appointment(appointment_id)?
                    .ok_or_else(|| anyhow::anyhow!("appointment {} not found", appointment_id))?;
                let contact_id = item.contact_id.unwrap_or(appointment.contact_id);
                let contact = self
                    .store
                    .get_contact(contact_id)?
                    .ok_or_else(|| anyhow::anyhow!("contact {} not found", contact_id))?;
                let timezone = resolve_timezone(
                    self.store.company_timezone(company_id)?.as_deref(),
                    self.default_timezone,
                );
                let rule = agent.rule(&item.rule_id);
                Ok(MessageContext::Reminder(AppointmentContext {
                    appointment,
                    contact,
                    timezone,
                    reminder_type: rule.map(|r| r.reminder_type).unwrap_or(ReminderType::Reminder),
                    lead_minutes: rule.map(|r| r.lead_minutes).unwrap_or(0),
                }))
            }
        }
    }

    fn record_failure(&self, item: &QueueItem, err: ExecutionError) -> Outcome {
        let message = err.to_string();

        // The message went out; counting an attempt here would invite a resend
        if let ExecutionError::Persist(_) = err {
            return Outcome::Failed {
                error: message,
                terminal: false,
            };
        }

        if err.is_terminal() {
            warn!("Item {} failed permanently: {}", item.id, message);
            let note = ItemNote::Failed {
                reason: FailReason::NoChannel,
                at: Utc::now(),
            };
            if let Err(e) =
                self.store
                    .terminate_item(item.id, QueueStatus::Failed, Some(&message), note)
            {
                error!("Failed to mark item {} failed: {}", item.id, e);
            }
            return Outcome::Failed {
                error: message,
                terminal: true,
            };
        }

        let status = match self
            .store
            .record_failed_attempt(item.id, &message, Utc::now())
        {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to record attempt for item {}: {}", item.id, e);
                item.status_after_failure()
            }
        };
        warn!(
            "Attempt {}/{} failed for item {}: {}",
            item.attempts + 1,
            item.max_attempts,
            item.id,
            message
        );
        Outcome::Failed {
            error: message,
            terminal: status == QueueStatus::Failed,
        }
    }

    fn cancel(&self, item: &QueueItem, reason: CancelReason, now: DateTime<Utc>) -> Outcome {
        info!("Cancelling item {}: {}", item.id, reason);
        let note = ItemNote::Cancelled { reason, at: now };
        if let Err(e) = self
            .store
            .terminate_item(item.id, QueueStatus::Cancelled, None, note)
        {
            error!("Failed to cancel item {}: {}", item.id, e);
        }
        Outcome::Cancelled(reason)
    }

    fn defer(&self, item: &QueueItem, until: DateTime<Utc>) -> Outcome {
        info!(
            "Deferring item {} to {}",
            item.id,
            until.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let note = ItemNote::Deferred {
            from: item.scheduled_at,
            to: until,
        };
        if let Err(e) = self.store.reschedule_item(item.id, until, note) {
            error!("Failed to defer item {}: {}", item.id, e);
        }
        Outcome::Deferred { until }
    }

    fn fail(&self, item: &QueueItem, reason: FailReason, now: DateTime<Utc>) -> Outcome {
        warn!("Failing item {}: {}", item.id, reason.message());
        let note = ItemNote::Failed { reason, at: now };
        if let Err(e) =
            self.store
                .terminate_item(item.id, QueueStatus::Failed, Some(reason.message()), note)
        {
            error!("Failed to mark item {} failed: {}", item.id, e);
        }
        Outcome::Failed {
            error: reason.message().to_string(),
            terminal: true,
        }
    }

    fn write_log(
        &self,
        item: &QueueItem,
        company_id: Option<Uuid>,
        outcome: &Outcome,
        started: Instant,
        side_effect: Option<&str>,
    ) {
        let message_sent = match outcome {
            Outcome::Sent { message } => message.clone(),
            _ => String::new(),
        };
        let log = ExecutionLog {
            queue_item_id: item.id,
            kind: item.kind,
            agent_id: item.agent_id,
            conversation_id: item.conversation_id,
            appointment_id: item.appointment_id,
            company_id: company_id.or(item.company_id),
            rule_name: item.rule_name.clone(),
            success: outcome.success(),
            error_message: outcome.error().map(String::from),
            response_time_ms: started.elapsed().as_millis() as i64,
            message_sent,
            side_effect: side_effect.map(String::from),
        };
        if let Err(e) = self.store.insert_execution_log(&log) {
            warn!("Failed to write execution log for item {}: {}", item.id, e);
        }
    }
}
