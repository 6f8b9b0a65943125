//! Read models for the records the engine consults but does not own:
//! agents and their rules, conversations, contacts, appointments and
//! channel instances, plus the rows it appends (execution logs).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::queue::QueueKind;

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Error,
    Paused,
    Inactive,
    Other(String),
}

impl AgentStatus {
    /// Agents in `error` keep running; the error is about their last turn,
    /// not about their configuration
    pub fn can_send(&self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Error)
    }

    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Error => "error",
            AgentStatus::Paused => "paused",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Other(s) => s,
        }
    }
}

impl FromStr for AgentStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => AgentStatus::Active,
            "error" => AgentStatus::Error,
            "paused" => AgentStatus::Paused,
            "inactive" => AgentStatus::Inactive,
            other => AgentStatus::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    Confirmation,
    #[default]
    Reminder,
}

/// A follow-up or reminder rule as configured on the agent (JSONB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_rule_kind")]
    pub kind: QueueKind,
    /// Follow-ups: minutes of silence before firing
    #[serde(default)]
    pub delay_minutes: i64,
    /// Reminders: minutes before the appointment
    #[serde(default)]
    pub lead_minutes: i64,
    #[serde(default)]
    pub reminder_type: ReminderType,
    pub message_template: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub business_hours_only: bool,
}

fn default_rule_kind() -> QueueKind {
    QueueKind::FollowUp
}

fn default_max_attempts() -> i32 {
    3
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn delay(&self) -> Duration {
        Duration::minutes(self.delay_minutes.max(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub status: AgentStatus,
    pub assistant_id: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub tone: Option<String>,
    pub language: Option<String>,
    pub rules: Vec<Rule>,
}

impl Agent {
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn active_follow_up_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.active && r.kind == QueueKind::FollowUp)
    }
}

// ============================================================================
// Conversations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: Option<String>,
    pub phone: String,
}

impl Contact {
    pub fn first_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub company_id: Uuid,
    pub contact_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub status: String,
    pub ai_enabled: bool,
    pub ai_paused: bool,
    pub assigned_user_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub thread_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn follow_up_paused(&self) -> bool {
        self.metadata
            .get("follow_up_paused")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_open(&self) -> bool {
        self.status != "closed"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            _ => Err(anyhow::anyhow!("Invalid message direction: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub direction: Direction,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation plus what personalization needs to know about it
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation: Conversation,
    pub contact: Contact,
    /// Oldest first
    pub messages: Vec<ConversationMessage>,
    pub message_count: usize,
    pub contact_replied: bool,
    pub since_last_message: Option<Duration>,
}

impl ConversationContext {
    pub fn new(
        conversation: Conversation,
        contact: Contact,
        messages: Vec<ConversationMessage>,
        now: DateTime<Utc>,
    ) -> Self {
        let contact_replied = messages
            .iter()
            .any(|m| m.direction == Direction::Inbound);
        let since_last_message = messages
            .last()
            .map(|m| m.created_at)
            .or(conversation.last_message_at)
            .map(|at| now - at);

        Self {
            message_count: messages.len(),
            conversation,
            contact,
            messages,
            contact_replied,
            since_last_message,
        }
    }

    /// "[Cliente]: ..." / "[Atendente]: ..." lines for prompts
    pub fn transcript(&self, limit: usize) -> String {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages
            .iter()
            .skip(skip)
            .map(|m| {
                let who = match m.direction {
                    Direction::Inbound => "Cliente",
                    Direction::Outbound => "Atendente",
                };
                format!("[{}]: {}", who, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Appointments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub contact_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub location: Option<String>,
    pub status: String,
}

impl Appointment {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status.as_str(), "cancelled" | "canceled")
    }
}

#[derive(Debug, Clone)]
pub struct AppointmentContext {
    pub appointment: Appointment,
    pub contact: Contact,
    pub timezone: chrono_tz::Tz,
    pub reminder_type: ReminderType,
    pub lead_minutes: i64,
}

/// What a message is being personalized for
#[derive(Debug, Clone)]
pub enum MessageContext {
    FollowUp(ConversationContext),
    Reminder(AppointmentContext),
}

impl MessageContext {
    pub fn contact(&self) -> &Contact {
        match self {
            MessageContext::FollowUp(c) => &c.contact,
            MessageContext::Reminder(r) => &r.contact,
        }
    }
}

// ============================================================================
// Channels, audit and notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInstance {
    pub id: Uuid,
    pub company_id: Uuid,
    pub instance_name: String,
}

/// Append-only audit row, one per execution attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionLog {
    pub queue_item_id: Uuid,
    pub kind: QueueKind,
    pub agent_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub rule_name: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub response_time_ms: i64,
    pub message_sent: String,
    pub side_effect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InsufficientCredits,
    LowCredits,
    ProviderError,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::InsufficientCredits => "insufficient_credits",
            NotificationKind::LowCredits => "low_credits",
            NotificationKind::ProviderError => "provider_error",
        }
    }
}

/// A conversation the orphan detector should evaluate
#[derive(Debug, Clone)]
pub struct OrphanCandidate {
    pub conversation_id: Uuid,
    pub contact_id: Uuid,
    pub company_id: Uuid,
    pub agent: Agent,
    pub last_message_at: DateTime<Utc>,
    pub last_message_direction: Direction,
}
