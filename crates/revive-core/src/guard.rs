//! Eligibility checks run against freshly re-read state right before an item
//! does any paid work. The first matching check decides the verdict.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::business_hours::{resolve_timezone, BusinessHours};
use crate::credits::CreditGate;
use crate::models::Agent;
use crate::queue::{CancelReason, FailReason, QueueItem, QueueKind, QueueStatus};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    StatusChanged(QueueStatus),
    /// Authoritative state could not be read; try again next tick
    StateUnavailable,
    ClaimedElsewhere,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Missing => "missing",
            SkipReason::StatusChanged(_) => "status_changed",
            SkipReason::StateUnavailable => "state_unavailable",
            SkipReason::ClaimedElsewhere => "claimed_elsewhere",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Eligible; carries the re-read item and its agent
    Proceed { item: QueueItem, agent: Agent },
    Skip(SkipReason),
    Cancel(CancelReason),
    Fail(FailReason),
    Defer { until: DateTime<Utc> },
}

pub struct Guard {
    store: Arc<dyn Store>,
    credits: Arc<CreditGate>,
    hours: Arc<dyn BusinessHours>,
    default_timezone: Tz,
    min_operational_credits: i64,
}

impl Guard {
    pub fn new(
        store: Arc<dyn Store>,
        credits: Arc<CreditGate>,
        hours: Arc<dyn BusinessHours>,
        default_timezone: Tz,
        min_operational_credits: i64,
    ) -> Self {
        Self {
            store,
            credits,
            hours,
            default_timezone,
            min_operational_credits,
        }
    }

    pub fn evaluate(&self, item: &QueueItem, now: DateTime<Utc>) -> Verdict {
        let fresh = match self.store.get_item(item.id) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return Verdict::Skip(SkipReason::Missing),
            Err(e) => {
                warn!("Failed to re-read item {}: {}", item.id, e);
                return Verdict::Skip(SkipReason::StateUnavailable);
            }
        };

        if fresh.status != QueueStatus::Pending {
            debug!("Item {} is {} now, skipping", fresh.id, fresh.status);
            return Verdict::Skip(SkipReason::StatusChanged(fresh.status));
        }

        if fresh.attempts_exhausted() {
            return Verdict::Fail(FailReason::MaxAttemptsReached);
        }

        let checked = match fresh.kind {
            QueueKind::FollowUp => self.check_conversation(&fresh),
            QueueKind::Reminder => self.check_appointment(&fresh, now),
        };
        match checked {
            Ok(Some(reason)) => return Verdict::Cancel(reason),
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to load state for item {}: {}", fresh.id, e);
                return Verdict::Skip(SkipReason::StateUnavailable);
            }
        }

        let agent = match self.store.get_agent(fresh.agent_id) {
            Ok(Some(agent)) if agent.status.can_send() => agent,
            Ok(_) => return Verdict::Cancel(CancelReason::AgentInactive),
            Err(e) => {
                warn!("Failed to load agent {}: {}", fresh.agent_id, e);
                return Verdict::Skip(SkipReason::StateUnavailable);
            }
        };

        let company_id = fresh.company_id.unwrap_or(agent.company_id);

        let needs_business_hours = agent
            .rule(&fresh.rule_id)
            .map(|r| r.business_hours_only)
            .unwrap_or(false);
        if needs_business_hours {
            let tz = self.company_timezone(company_id);
            if !self.hours.is_open(tz, now) {
                let next = self.hours.next_open(tz, now);
                // Always move forward
                let until = next.max(fresh.scheduled_at + Duration::minutes(1));
                return Verdict::Defer { until };
            }
        }

        let check = self
            .credits
            .check_balance(Some(company_id), self.min_operational_credits);
        if !check.sufficient {
            self.credits.notify_insufficient(company_id, &check);
            return Verdict::Fail(FailReason::InsufficientCredits);
        }

        Verdict::Proceed { item: fresh, agent }
    }

    fn check_conversation(&self, item: &QueueItem) -> anyhow::Result<Option<CancelReason>> {
        let Some(conversation_id) = item.conversation_id else {
            return Ok(Some(CancelReason::NoAgent));
        };
        // A missing conversation surfaces as a load failure in the driver
        let Some(conversation) = self.store.get_conversation(conversation_id)? else {
            return Ok(None);
        };

        if conversation.follow_up_paused() {
            return Ok(Some(CancelReason::Paused));
        }
        if conversation.agent_id != Some(item.agent_id) {
            return Ok(Some(CancelReason::NoAgent));
        }
        if conversation.ai_paused {
            return Ok(Some(CancelReason::AgentPaused));
        }
        if conversation.assigned_user_id.is_some() && !conversation.ai_enabled {
            return Ok(Some(CancelReason::AssignedToHuman));
        }
        Ok(None)
    }

    fn check_appointment(
        &self,
        item: &QueueItem,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<CancelReason>> {
        let Some(appointment_id) = item.appointment_id else {
            return Ok(Some(CancelReason::AppointmentCancelled));
        };
        let Some(appointment) = self.store.get_appointment(appointment_id)? else {
            return Ok(Some(CancelReason::AppointmentCancelled));
        };

        if appointment.is_cancelled() {
            return Ok(Some(CancelReason::AppointmentCancelled));
        }
        if appointment.starts_at <= now {
            return Ok(Some(CancelReason::AppointmentPast));
        }
        Ok(None)
    }

    fn company_timezone(&self, company_id: uuid::Uuid) -> Tz {
        let name = self.store.company_timezone(company_id).unwrap_or_else(|e| {
            warn!("Failed to load timezone for company {}: {}", company_id, e);
            None
        });
        resolve_timezone(name.as_deref(), self.default_timezone)
    }
}
