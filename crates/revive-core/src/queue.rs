//! Queue item model
//!
//! Follow-ups and appointment reminders share one structure, told apart by
//! [`QueueKind`]. Items are never deleted: they move from `pending` to one of
//! the terminal statuses and carry a typed trail of [`ItemNote`]s explaining
//! each transition.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    FollowUp,
    Reminder,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::FollowUp => "follow_up",
            QueueKind::Reminder => "reminder",
        }
    }
}

impl FromStr for QueueKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "follow_up" => Ok(QueueKind::FollowUp),
            "reminder" => Ok(QueueKind::Reminder),
            _ => Err(anyhow::anyhow!(
                "Invalid queue kind: {}. Must be 'follow_up' or 'reminder'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueStatus::Pending)
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid queue status: {}", s)),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Follow-ups paused on the conversation
    Paused,
    /// Conversation has no agent assigned
    NoAgent,
    /// Agent disabled for this conversation
    AgentPaused,
    AssignedToHuman,
    AgentInactive,
    AppointmentCancelled,
    AppointmentPast,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Paused => "paused",
            CancelReason::NoAgent => "no_agent",
            CancelReason::AgentPaused => "agent_paused",
            CancelReason::AssignedToHuman => "assigned_to_human",
            CancelReason::AgentInactive => "agent_inactive",
            CancelReason::AppointmentCancelled => "appointment_cancelled",
            CancelReason::AppointmentPast => "appointment_past",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure causes decided before any work is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    MaxAttemptsReached,
    InsufficientCredits,
    NoChannel,
    Stale,
}

impl FailReason {
    pub fn message(&self) -> &'static str {
        match self {
            FailReason::MaxAttemptsReached => "max attempts reached",
            FailReason::InsufficientCredits => "insufficient credits",
            FailReason::NoChannel => "no active channel instance",
            FailReason::Stale => "stale: still pending past cleanup horizon",
        }
    }
}

/// One entry of an item's transition trail (stored as JSONB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemNote {
    Cancelled {
        reason: CancelReason,
        at: DateTime<Utc>,
    },
    Failed {
        reason: FailReason,
        at: DateTime<Utc>,
    },
    Deferred {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Orphan {
        minutes_late: i64,
        detected_at: DateTime<Utc>,
    },
}

// ============================================================================
// Queue Item
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub kind: QueueKind,
    pub agent_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub rule_id: String,
    pub rule_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_error: Option<String>,
    pub generated_message: Option<String>,
    pub message_template: String,
    pub notes: Vec<ItemNote>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Status after one more failed attempt
    pub fn status_after_failure(&self) -> QueueStatus {
        if self.attempts + 1 >= self.max_attempts {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.notes
            .iter()
            .any(|n| matches!(n, ItemNote::Orphan { .. }))
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.notes.iter().rev().find_map(|n| match n {
            ItemNote::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        })
    }
}

/// Parse the JSONB notes column; unreadable entries are dropped
pub fn parse_notes(value: serde_json::Value) -> Result<Vec<ItemNote>> {
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(entries) => Ok(entries
            .into_iter()
            .filter_map(|e| serde_json::from_value(e).ok())
            .collect()),
        other => serde_json::from_value(other).context("Failed to parse item notes"),
    }
}

/// Request to backfill a follow-up that should have been queued
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrphanItem {
    pub agent_id: Uuid,
    pub conversation_id: Uuid,
    pub contact_id: Uuid,
    pub company_id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub max_attempts: i32,
    pub message_template: String,
    pub note: ItemNote,
}
