//! Message personalization chain
//!
//! Strategies are tried in order until one produces a usable message:
//!
//! 1. The agent's assistant runs on the conversation thread
//! 2. A raw completion over the same thread's history
//! 3. A stateless completion with a short conversation excerpt
//! 4. Placeholder substitution on the rule template
//!
//! Strategies 1-3 are paid and only run when the company's balance covers
//! the estimate. The template rung is free and always produces text, so
//! personalization as a whole never fails.

pub mod prompts;
pub mod template;

use anyhow::Result;
use chrono::Utc;
use revive_clients::{ChatMessage, ChatRequest, RunStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credits::{estimate_tokens, CreditGate};
use crate::llm::LlmProvider;
use crate::models::{Agent, MessageContext, NotificationKind};
use crate::notify::Notifier;
use crate::queue::QueueItem;
use crate::retry::{poll_until, PollPolicy, Probe};
use crate::store::Store;

/// Thread messages replayed into the raw completion
const THREAD_HISTORY: u32 = 20;
const MAX_COMPLETION_TOKENS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AssistantThread,
    ThreadCompletion,
    Completion,
    Template,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::AssistantThread => "assistant_thread",
            Strategy::ThreadCompletion => "thread_completion",
            Strategy::Completion => "completion",
            Strategy::Template => "template",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Personalized {
    pub text: String,
    pub strategy: Strategy,
}

impl Personalized {
    fn template(text: String) -> Self {
        Self {
            text,
            strategy: Strategy::Template,
        }
    }
}

struct Generation {
    text: String,
    tokens: u32,
}

pub struct Personalizer {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn Store>,
    credits: Arc<CreditGate>,
    notifier: Arc<Notifier>,
    default_model: String,
    run_poll: PollPolicy,
}

impl Personalizer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn Store>,
        credits: Arc<CreditGate>,
        notifier: Arc<Notifier>,
        default_model: String,
        run_poll: PollPolicy,
    ) -> Self {
        Self {
            llm,
            store,
            credits,
            notifier,
            default_model,
            run_poll,
        }
    }

    /// Produce the outgoing text for `item`. Always returns non-empty text.
    pub async fn personalize(
        &self,
        item: &QueueItem,
        agent: &Agent,
        context: &MessageContext,
        company_id: Option<Uuid>,
    ) -> Personalized {
        let fallback = template::render(&item.message_template, context);

        let required = estimate_tokens(&item.message_template, agent.assistant_id.is_some());
        let check = self.credits.check_balance(company_id, required);
        let company_id = match company_id {
            Some(company_id) if check.sufficient => company_id,
            Some(company_id) => {
                info!(
                    "Company {} has {} credits, {} needed; using template for item {}",
                    company_id, check.current_balance, check.required, item.id
                );
                self.credits.notify_insufficient(company_id, &check);
                return Personalized::template(fallback);
            }
            None => return Personalized::template(fallback),
        };

        let instruction = prompts::instruction(&item.message_template, context);

        if let Some(assistant_id) = agent.assistant_id.as_deref() {
            match self.resolve_thread(context).await {
                Ok(thread_id) => {
                    let result = self
                        .run_assistant(&thread_id, assistant_id, &instruction, context)
                        .await;
                    if let Some(done) =
                        self.accept(Strategy::AssistantThread, result, item, company_id, context)
                    {
                        return done;
                    }

                    let result = self
                        .thread_completion(&thread_id, agent, &instruction)
                        .await;
                    if let Some(done) =
                        self.accept(Strategy::ThreadCompletion, result, item, company_id, context)
                    {
                        return done;
                    }
                }
                Err(e) => warn!("Could not resolve thread for item {}: {}", item.id, e),
            }
        }

        let result = self.completion(agent, &item.message_template, context).await;
        if let Some(done) = self.accept(Strategy::Completion, result, item, company_id, context) {
            return done;
        }

        warn!(
            "All model strategies failed for item {}, falling back to template",
            item.id
        );
        self.notifier.notify(
            company_id,
            NotificationKind::ProviderError,
            "Falha na personalização",
            "O provedor de IA não respondeu; mensagens estão sendo enviadas a partir do modelo.",
            Utc::now(),
        );
        Personalized::template(fallback)
    }

    /// Validate a strategy's output and debit what it actually consumed
    fn accept(
        &self,
        strategy: Strategy,
        result: Result<Generation>,
        item: &QueueItem,
        company_id: Uuid,
        context: &MessageContext,
    ) -> Option<Personalized> {
        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                warn!("{} failed for item {}: {}", strategy.as_str(), item.id, e);
                return None;
            }
        };

        let text = clean(&generation.text);
        if text.is_empty() {
            warn!("{} returned empty text for item {}", strategy.as_str(), item.id);
            return None;
        }
        if text.chars().count() > prompts::max_chars(context) {
            debug!(
                "{} output for item {} exceeds {} chars",
                strategy.as_str(),
                item.id,
                prompts::max_chars(context)
            );
        }

        let debit_context = serde_json::json!({
            "queue_item_id": item.id,
            "kind": item.kind.as_str(),
            "rule": item.rule_name,
            "strategy": strategy.as_str(),
            "tokens": generation.tokens,
        });
        self.credits.debit(
            company_id,
            i64::from(generation.tokens),
            &debit_context,
            &format!("{} personalization ({})", item.kind.as_str(), item.rule_name),
        );

        info!(
            "Personalized item {} via {} ({} tokens)",
            item.id,
            strategy.as_str(),
            generation.tokens
        );
        Some(Personalized { text, strategy })
    }

    /// Follow-ups reuse (or create and cache) the conversation thread;
    /// reminders always get a fresh one
    async fn resolve_thread(&self, context: &MessageContext) -> Result<String> {
        if let MessageContext::FollowUp(conversation) = context {
            if let Some(thread_id) = conversation.conversation.thread_id.as_deref() {
                return Ok(thread_id.to_string());
            }
            let thread_id = self.llm.create_thread().await?;
            if let Err(e) = self
                .store
                .set_conversation_thread(conversation.conversation.id, &thread_id)
            {
                warn!(
                    "Failed to cache thread for conversation {}: {}",
                    conversation.conversation.id, e
                );
            }
            return Ok(thread_id);
        }
        self.llm.create_thread().await
    }

    async fn run_assistant(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instruction: &str,
        context: &MessageContext,
    ) -> Result<Generation> {
        self.llm.add_message(thread_id, "user", instruction).await?;

        let limit = format!(
            "Responda apenas com o texto da mensagem, em no máximo {} caracteres.",
            prompts::max_chars(context)
        );
        let run = self
            .llm
            .start_run(thread_id, assistant_id, Some(&limit))
            .await?;

        let run = if run.status.is_terminal() {
            run
        } else {
            let llm: &dyn LlmProvider = self.llm.as_ref();
            let run_id: &str = &run.id;
            poll_until(self.run_poll, move |_| async move {
                let run = llm.get_run(thread_id, run_id).await?;
                Ok::<_, anyhow::Error>(if run.status.is_terminal() {
                    Probe::Ready(run)
                } else {
                    Probe::Pending
                })
            })
            .await?
        };

        if run.status != RunStatus::Completed {
            anyhow::bail!(
                "assistant run {} ended as {:?}: {}",
                run.id,
                run.status,
                run.last_error.unwrap_or_default()
            );
        }

        let reply = self
            .llm
            .thread_messages(thread_id, 10)
            .await?
            .into_iter()
            .find(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run.id.as_str()))
            .ok_or_else(|| anyhow::anyhow!("run {} left no assistant message", run.id))?;

        Ok(Generation {
            text: reply.text,
            tokens: run.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn thread_completion(
        &self,
        thread_id: &str,
        agent: &Agent,
        instruction: &str,
    ) -> Result<Generation> {
        let history = self.llm.thread_messages(thread_id, THREAD_HISTORY).await?;

        let mut messages = vec![ChatMessage::system(prompts::system_prompt(agent))];
        for message in history.iter().rev() {
            if message.text.starts_with(prompts::INSTRUCTION_MARKER) {
                continue;
            }
            messages.push(match message.role.as_str() {
                "assistant" => ChatMessage::assistant(message.text.clone()),
                _ => ChatMessage::user(message.text.clone()),
            });
        }
        messages.push(ChatMessage::user(instruction));

        let completion = self.llm.complete(&self.request(agent, messages)).await?;

        if let Err(e) = self
            .llm
            .add_message(thread_id, "assistant", &completion.text)
            .await
        {
            debug!("Failed to append completion to thread {}: {}", thread_id, e);
        }

        Ok(Generation {
            text: completion.text,
            tokens: completion.usage.total_tokens,
        })
    }

    async fn completion(
        &self,
        agent: &Agent,
        template: &str,
        context: &MessageContext,
    ) -> Result<Generation> {
        let messages = vec![
            ChatMessage::system(prompts::system_prompt(agent)),
            ChatMessage::user(prompts::instruction(template, context)),
        ];
        let completion = self.llm.complete(&self.request(agent, messages)).await?;
        Ok(Generation {
            text: completion.text,
            tokens: completion.usage.total_tokens,
        })
    }

    fn request(&self, agent: &Agent, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: agent
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            temperature: agent.temperature,
            max_tokens: Some(MAX_COMPLETION_TOKENS),
        }
    }
}

/// Trim whitespace and wrapping quotes
fn clean(text: &str) -> String {
    let text = text.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| text.strip_prefix('“').and_then(|t| t.strip_suffix('”')))
        .unwrap_or(text);
    text.trim().to_string()
}
