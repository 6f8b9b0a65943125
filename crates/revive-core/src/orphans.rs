//! Stale-item reaping and orphaned follow-up detection

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{Direction, OrphanCandidate};
use crate::queue::{FailReason, ItemNote, NewOrphanItem, QueueItem};
use crate::store::Store;

pub struct OrphanDetector {
    store: Arc<dyn Store>,
    stale_after: Duration,
    lookback: Duration,
}

impl OrphanDetector {
    pub fn new(store: Arc<dyn Store>, stale_after: Duration, lookback: Duration) -> Self {
        Self {
            store,
            stale_after,
            lookback,
        }
    }

    /// Fail items still pending past the stale horizon
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let note = ItemNote::Failed {
            reason: FailReason::Stale,
            at: now,
        };
        let swept = self.store.sweep_stale_items(now - self.stale_after, note)?;
        if swept > 0 {
            info!("Reaped {} stale queue items", swept);
        }
        Ok(swept)
    }

    /// Create the follow-ups that should exist but were never queued.
    /// At most one per conversation per run, the earliest rule that is due.
    pub fn detect(&self, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let candidates = self.store.orphan_candidates(now - self.lookback)?;
        let mut created = Vec::new();

        for candidate in candidates {
            match self.materialize(&candidate, now) {
                Ok(Some(item)) => created.push(item),
                Ok(None) => {}
                Err(e) => warn!(
                    "Orphan check failed for conversation {}: {}",
                    candidate.conversation_id, e
                ),
            }
        }

        if !created.is_empty() {
            info!("Created {} orphaned follow-ups", created.len());
        }
        Ok(created)
    }

    fn materialize(&self, candidate: &OrphanCandidate, now: DateTime<Utc>) -> Result<Option<QueueItem>> {
        // The contact spoke last; the agent owes a reply, not a follow-up
        if candidate.last_message_direction != Direction::Outbound {
            return Ok(None);
        }

        let mut rules: Vec<_> = candidate.agent.active_follow_up_rules().collect();
        rules.sort_by_key(|r| r.delay_minutes);

        for rule in rules {
            let due_at = candidate.last_message_at + rule.delay();
            if due_at > now {
                continue;
            }
            if self
                .store
                .item_exists_for_rule(candidate.conversation_id, &rule.id)?
            {
                continue;
            }
            if self
                .store
                .sent_item_exists_for_rule(candidate.conversation_id, &rule.id)?
            {
                warn!(
                    "Rule {} already sent for conversation {}, not creating orphan",
                    rule.id, candidate.conversation_id
                );
                continue;
            }

            let minutes_late = (now - due_at).num_minutes();
            let new = NewOrphanItem {
                agent_id: candidate.agent.id,
                conversation_id: candidate.conversation_id,
                contact_id: candidate.contact_id,
                company_id: candidate.company_id,
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                scheduled_at: due_at,
                max_attempts: rule.max_attempts.max(1),
                message_template: rule.message_template.clone(),
                note: ItemNote::Orphan {
                    minutes_late,
                    detected_at: now,
                },
            };

            match self.store.create_orphan_item(&new)? {
                Some(item) => {
                    info!(
                        "Orphaned follow-up '{}' for conversation {} ({} min late)",
                        rule.name, candidate.conversation_id, minutes_late
                    );
                    return Ok(Some(item));
                }
                None => debug!(
                    "Orphan for rule {} on conversation {} already exists",
                    rule.id, candidate.conversation_id
                ),
            }
        }

        Ok(None)
    }
}
