//! Shared fixtures and fakes for unit tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc, Weekday};
use revive_clients::{ChatCompletion, ChatRequest, Run, RunStatus, ThreadMessage, Usage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::business_hours::BusinessWindow;
use crate::credits::CreditGate;
use crate::llm::LlmProvider;
use crate::messenger::Messenger;
use crate::models::{
    Agent, AgentStatus, Appointment, AppointmentContext, ChannelInstance, Contact, Conversation,
    ConversationContext, ConversationMessage, Direction, MessageContext, ReminderType, Rule,
};
use crate::notify::Notifier;
use crate::queue::{QueueItem, QueueKind, QueueStatus};
use crate::store::memory::MemoryStore;
use crate::store::Store;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Fake LLM
// ============================================================================

pub struct FakeBehavior {
    pub thread_ok: bool,
    pub run_ok: bool,
    /// Status every `get_run` reports
    pub run_status: RunStatus,
    /// `None` makes completions fail
    pub completion_reply: Option<String>,
    /// Whether a completed run writes its reply to the thread
    pub run_writes_reply: bool,
}

pub struct FakeLlm {
    behavior: Mutex<FakeBehavior>,
    calls: Mutex<Vec<&'static str>>,
    threads: Mutex<HashMap<String, Vec<ThreadMessage>>>,
}

impl FakeLlm {
    pub const ASSISTANT_REPLY: &'static str = "Maria, conseguiu ver a proposta que te mandei?";
    pub const COMPLETION_REPLY: &'static str = "Conseguiu dar uma olhada na proposta, Maria?";
    pub const TOKENS: u32 = 120;

    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(FakeBehavior {
                thread_ok: true,
                run_ok: true,
                run_status: RunStatus::Completed,
                completion_reply: Some(Self::COMPLETION_REPLY.to_string()),
                run_writes_reply: true,
            }),
            calls: Mutex::new(Vec::new()),
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// Every call errors
    pub fn failing() -> Self {
        let llm = Self::new();
        {
            let mut behavior = llm.behavior();
            behavior.thread_ok = false;
            behavior.run_ok = false;
            behavior.completion_reply = None;
        }
        llm
    }

    pub fn behavior(&self) -> MutexGuard<'_, FakeBehavior> {
        lock(&self.behavior)
    }

    pub fn calls(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == name).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    fn record(&self, name: &'static str) {
        lock(&self.calls).push(name);
    }

    fn push(&self, thread_id: &str, role: &str, text: &str, run_id: Option<&str>) {
        let mut threads = lock(&self.threads);
        let messages = threads.entry(thread_id.to_string()).or_default();
        messages.push(ThreadMessage {
            id: format!("msg_{}", messages.len()),
            role: role.to_string(),
            text: text.to_string(),
            created_at: Utc::now().timestamp(),
            run_id: run_id.map(String::from),
        });
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn create_thread(&self) -> Result<String> {
        self.record("create_thread");
        if !self.behavior().thread_ok {
            anyhow::bail!("provider unavailable");
        }
        let mut threads = lock(&self.threads);
        let id = format!("thread_{}", threads.len());
        threads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn add_message(&self, thread_id: &str, role: &str, content: &str) -> Result<()> {
        self.record("add_message");
        if !self.behavior().thread_ok {
            anyhow::bail!("provider unavailable");
        }
        self.push(thread_id, role, content, None);
        Ok(())
    }

    async fn start_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        _instructions: Option<&str>,
    ) -> Result<Run> {
        self.record("start_run");
        if !self.behavior().run_ok {
            anyhow::bail!("provider unavailable");
        }
        Ok(Run {
            id: format!("run_{}", self.calls("start_run")),
            status: RunStatus::Queued,
            usage: None,
            last_error: None,
        })
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.record("get_run");
        let (status, writes_reply) = {
            let behavior = self.behavior();
            (behavior.run_status, behavior.run_writes_reply)
        };
        if status == RunStatus::Completed && writes_reply {
            self.push(thread_id, "assistant", Self::ASSISTANT_REPLY, Some(run_id));
        }
        Ok(Run {
            id: run_id.to_string(),
            status,
            usage: (status == RunStatus::Completed).then_some(Usage {
                prompt_tokens: Self::TOKENS - 20,
                completion_tokens: 20,
                total_tokens: Self::TOKENS,
            }),
            last_error: None,
        })
    }

    async fn thread_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>> {
        self.record("thread_messages");
        if !self.behavior().thread_ok {
            anyhow::bail!("provider unavailable");
        }
        let threads = lock(&self.threads);
        Ok(threads
            .get(thread_id)
            .map(|m| m.iter().rev().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion> {
        self.record("complete");
        match self.behavior().completion_reply.clone() {
            Some(text) => Ok(ChatCompletion {
                text,
                usage: Usage {
                    prompt_tokens: Self::TOKENS - 20,
                    completion_tokens: 20,
                    total_tokens: Self::TOKENS,
                },
            }),
            None => anyhow::bail!("provider returned 503"),
        }
    }
}

// ============================================================================
// Fake messenger
// ============================================================================

#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub fail: AtomicBool,
    /// Accept sends without reporting a message id
    pub omit_ids: AtomicBool,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        lock(&self.sent).clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_omitting_ids(&self, omit: bool) {
        self.omit_ids.store(omit, Ordering::SeqCst);
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_message(
        &self,
        instance: &str,
        recipient: &str,
        text: &str,
    ) -> Result<Option<String>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("gateway returned 500");
        }
        let mut sent = lock(&self.sent);
        sent.push((instance.to_string(), recipient.to_string(), text.to_string()));
        if self.omit_ids.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(format!("wamid-{}", sent.len())))
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// One company with an agent, a contact, an open conversation whose last
/// message was outbound 20 minutes ago, a connected channel and credits
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<Notifier>,
    pub credits: Arc<CreditGate>,
    pub company_id: Uuid,
    pub agent: Agent,
    pub contact: Contact,
    pub conversation: Conversation,
    pub now: DateTime<Utc>,
}

impl Fixture {
    pub const FOLLOW_UP_TEMPLATE: &'static str = "Oi {nome}, ainda tem interesse?";

    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_assistant() -> Self {
        Self::build(Some("asst_123".to_string()))
    }

    fn build(assistant_id: Option<String>) -> Self {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Notifier::new(store.clone(), Duration::minutes(60)));
        let credits = Arc::new(CreditGate::new(store.clone(), notifier.clone(), 100));
        let company_id = Uuid::new_v4();

        let agent = Agent {
            id: Uuid::new_v4(),
            company_id,
            name: "Luna".to_string(),
            status: AgentStatus::Active,
            assistant_id,
            model: None,
            temperature: Some(0.7),
            tone: None,
            language: None,
            rules: vec![
                rule("r15", "15 min", QueueKind::FollowUp, 15),
                rule("r60", "60 min", QueueKind::FollowUp, 60),
                Rule {
                    lead_minutes: 120,
                    message_template: "Olá {nome}, lembrete: {titulo} em {data} às {horario}."
                        .to_string(),
                    ..rule("lembrete", "2h antes", QueueKind::Reminder, 0)
                },
            ],
        };

        let contact = Contact {
            id: Uuid::new_v4(),
            company_id,
            name: Some("Maria Oliveira".to_string()),
            phone: "5511987654321".to_string(),
        };

        let last_message_at = now - Duration::minutes(20);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            company_id,
            contact_id: contact.id,
            agent_id: Some(agent.id),
            status: "open".to_string(),
            ai_enabled: true,
            ai_paused: false,
            assigned_user_id: None,
            metadata: serde_json::json!({}),
            thread_id: None,
            last_message_at: Some(last_message_at),
        };

        {
            let mut state = store.state();
            state.agents.insert(agent.id, agent.clone());
            state.contacts.insert(contact.id, contact.clone());
            state.conversations.insert(conversation.id, conversation.clone());
            state.messages.insert(
                conversation.id,
                vec![
                    ConversationMessage {
                        id: Uuid::new_v4(),
                        direction: Direction::Inbound,
                        content: "Quanto fica o plano anual?".to_string(),
                        created_at: now - Duration::minutes(25),
                    },
                    ConversationMessage {
                        id: Uuid::new_v4(),
                        direction: Direction::Outbound,
                        content: "Fica R$ 1.200. Posso te mandar a proposta?".to_string(),
                        created_at: last_message_at,
                    },
                ],
            );
            state.channels.insert(
                company_id,
                ChannelInstance {
                    id: Uuid::new_v4(),
                    company_id,
                    instance_name: "loja-centro".to_string(),
                },
            );
            state.balances.insert(company_id, 10_000);
        }

        Self {
            store,
            notifier,
            credits,
            company_id,
            agent,
            contact,
            conversation,
            now,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Pending follow-up for `rule_id`, due one minute ago, already stored
    pub fn follow_up_item(&self, rule_id: &str) -> QueueItem {
        let rule = self.agent.rule(rule_id).cloned().unwrap_or_else(|| {
            rule(rule_id, rule_id, QueueKind::FollowUp, 15)
        });
        let item = QueueItem {
            id: Uuid::new_v4(),
            kind: QueueKind::FollowUp,
            agent_id: self.agent.id,
            conversation_id: Some(self.conversation.id),
            appointment_id: None,
            contact_id: Some(self.contact.id),
            company_id: Some(self.company_id),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            scheduled_at: self.now - Duration::minutes(1),
            created_at: self.now - Duration::minutes(16),
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: rule.max_attempts,
            executed_at: None,
            execution_error: None,
            generated_message: None,
            message_template: Self::FOLLOW_UP_TEMPLATE.to_string(),
            notes: Vec::new(),
            claimed_at: None,
        };
        self.store.insert_item(item.clone());
        item
    }

    pub fn follow_up_context(&self) -> MessageContext {
        let messages = self
            .store
            .state()
            .messages
            .get(&self.conversation.id)
            .cloned()
            .unwrap_or_default();
        let conversation = self.store.state().conversations[&self.conversation.id].clone();
        MessageContext::FollowUp(ConversationContext::new(
            conversation,
            self.contact.clone(),
            messages,
            self.now,
        ))
    }

    /// Stored appointment plus a pending reminder item for it
    pub fn reminder_item(&self, starts_at: DateTime<Utc>) -> (QueueItem, MessageContext) {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            company_id: self.company_id,
            contact_id: self.contact.id,
            title: "Avaliação".to_string(),
            starts_at,
            location: Some("Rua Augusta, 500".to_string()),
            status: "scheduled".to_string(),
        };
        self.store
            .state()
            .appointments
            .insert(appointment.id, appointment.clone());

        let rule = self.agent.rule("lembrete").cloned().unwrap_or_else(|| {
            rule("lembrete", "2h antes", QueueKind::Reminder, 0)
        });
        let item = QueueItem {
            id: Uuid::new_v4(),
            kind: QueueKind::Reminder,
            agent_id: self.agent.id,
            conversation_id: None,
            appointment_id: Some(appointment.id),
            contact_id: Some(self.contact.id),
            company_id: Some(self.company_id),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            scheduled_at: self.now - Duration::minutes(1),
            created_at: self.now - Duration::hours(1),
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: rule.max_attempts,
            executed_at: None,
            execution_error: None,
            generated_message: None,
            message_template: rule.message_template.clone(),
            notes: Vec::new(),
            claimed_at: None,
        };
        self.store.insert_item(item.clone());

        let context = MessageContext::Reminder(AppointmentContext {
            appointment,
            contact: self.contact.clone(),
            timezone: chrono_tz::America::Sao_Paulo,
            reminder_type: ReminderType::Reminder,
            lead_minutes: rule.lead_minutes,
        });
        (item, context)
    }

    pub fn update_conversation(&self, f: impl FnOnce(&mut Conversation)) {
        if let Some(conversation) = self.store.state().conversations.get_mut(&self.conversation.id) {
            f(conversation);
        }
    }

    pub fn update_agent(&self, f: impl FnOnce(&mut Agent)) {
        if let Some(agent) = self.store.state().agents.get_mut(&self.agent.id) {
            f(agent);
        }
    }
}

pub fn rule(id: &str, name: &str, kind: QueueKind, delay_minutes: i64) -> Rule {
    Rule {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        delay_minutes,
        lead_minutes: 0,
        reminder_type: ReminderType::Reminder,
        message_template: Fixture::FOLLOW_UP_TEMPLATE.to_string(),
        max_attempts: 3,
        active: true,
        business_hours_only: false,
    }
}

/// Open around the clock
pub fn always_open() -> BusinessWindow {
    BusinessWindow {
        start_hour: 0,
        end_hour: 24,
        days: vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ],
    }
}
