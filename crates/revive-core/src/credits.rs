//! Credit ledger gate
//!
//! Checks a company's prepaid balance before paid work and debits actual
//! token usage afterwards. Balance checks fail closed; debits are never
//! speculative.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::NotificationKind;
use crate::notify::Notifier;
use crate::store::Store;

/// Tokens per template character
const TOKENS_PER_CHAR: f64 = 0.25;
/// Safety margin on the estimate
const ESTIMATE_MARGIN: f64 = 1.2;
/// Thread-based calls carry the whole thread, so they never cost less than this
pub const THREAD_MIN_TOKENS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub sufficient: bool,
    pub current_balance: i64,
    pub required: i64,
}

impl BalanceCheck {
    fn denied(current_balance: i64, required: i64) -> Self {
        Self {
            sufficient: false,
            current_balance,
            required,
        }
    }
}

pub struct CreditGate {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    low_balance_alert: i64,
}

impl CreditGate {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>, low_balance_alert: i64) -> Self {
        Self {
            store,
            notifier,
            low_balance_alert,
        }
    }

    /// Compare the balance against `required`. Never errors: a missing
    /// company or a failed lookup reports insufficient.
    pub fn check_balance(&self, company_id: Option<Uuid>, required: i64) -> BalanceCheck {
        let Some(company_id) = company_id.filter(|id| !id.is_nil()) else {
            warn!("Credit check without a company id, denying");
            return BalanceCheck::denied(0, required);
        };

        match self.store.credit_balance(company_id) {
            Ok(balance) => {
                let current_balance = balance.unwrap_or(0);
                BalanceCheck {
                    sufficient: current_balance >= required,
                    current_balance,
                    required,
                }
            }
            Err(e) => {
                error!("Credit lookup failed for company {}: {}", company_id, e);
                BalanceCheck::denied(0, required)
            }
        }
    }

    /// Debit actual usage. The before/after comparison is diagnostic only.
    pub fn debit(
        &self,
        company_id: Uuid,
        tokens_used: i64,
        context: &serde_json::Value,
        description: &str,
    ) -> bool {
        if tokens_used <= 0 {
            debug!("Nothing to debit for company {}", company_id);
            return true;
        }

        let before = self.store.credit_balance(company_id).ok().flatten();

        let after = match self
            .store
            .debit_credits(company_id, tokens_used, description, context)
        {
            Ok(after) => after,
            Err(e) => {
                error!(
                    "Failed to debit {} credits from company {}: {}",
                    tokens_used, company_id, e
                );
                return false;
            }
        };

        if let Some(before) = before {
            let observed = before - after;
            if observed != tokens_used {
                warn!(
                    "Credit drift for company {}: expected -{} but balance moved {} -> {} ({})",
                    company_id, tokens_used, before, after, -observed
                );
            }
        }

        info!(
            "Debited {} credits from company {} (balance {})",
            tokens_used, company_id, after
        );

        if after < self.low_balance_alert {
            self.notifier.notify(
                company_id,
                NotificationKind::LowCredits,
                "Saldo de créditos baixo",
                &format!(
                    "Restam {} créditos. Recarregue para manter os follow-ups personalizados.",
                    after
                ),
                Utc::now(),
            );
        }

        true
    }

    pub fn notify_insufficient(&self, company_id: Uuid, check: &BalanceCheck) {
        self.notifier.notify(
            company_id,
            NotificationKind::InsufficientCredits,
            "Créditos insuficientes",
            &format!(
                "Saldo de {} créditos, {} necessários. Mensagens estão sendo enviadas sem personalização.",
                check.current_balance, check.required
            ),
            Utc::now(),
        );
    }
}

/// Estimate the cost of personalizing `template`
pub fn estimate_tokens(template: &str, thread_based: bool) -> i64 {
    let chars = template.chars().count() as f64;
    let estimate = (chars * TOKENS_PER_CHAR * ESTIMATE_MARGIN).ceil() as i64;
    if thread_based {
        estimate.max(THREAD_MIN_TOKENS)
    } else {
        estimate.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn gate(store: Arc<MemoryStore>) -> CreditGate {
        let notifier = Arc::new(Notifier::new(store.clone(), Duration::minutes(60)));
        CreditGate::new(store, notifier, 100)
    }

    #[test]
    fn test_estimate_tokens() {
        // 100 chars * 0.25 * 1.2 = 30
        let template = "a".repeat(100);
        assert_eq!(estimate_tokens(&template, false), 30);
        assert_eq!(estimate_tokens(&template, true), THREAD_MIN_TOKENS);
        assert_eq!(estimate_tokens("", false), 1);
    }

    #[test]
    fn test_check_balance_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store.clone());

        assert!(!gate.check_balance(None, 10).sufficient);
        assert!(!gate.check_balance(Some(Uuid::nil()), 10).sufficient);

        let company = Uuid::new_v4();
        // No ledger row counts as zero
        assert_eq!(gate.check_balance(Some(company), 10).current_balance, 0);

        store.state().balances.insert(company, 50);
        assert!(gate.check_balance(Some(company), 50).sufficient);
        assert!(!gate.check_balance(Some(company), 51).sufficient);

        store.state().fail_balance_query = true;
        let check = gate.check_balance(Some(company), 10);
        assert!(!check.sufficient);
        assert_eq!(check.required, 10);
    }

    #[test]
    fn test_debit_records_actual_usage() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store.clone());
        let company = Uuid::new_v4();
        store.state().balances.insert(company, 1_000);

        assert!(gate.debit(company, 150, &serde_json::json!({}), "follow-up"));
        assert_eq!(store.state().balances[&company], 850);
        assert_eq!(store.state().debits.len(), 1);
        assert!(store.state().notifications.is_empty());
    }

    #[test]
    fn test_debit_drift_does_not_block() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store.clone());
        let company = Uuid::new_v4();
        {
            let mut state = store.state();
            state.balances.insert(company, 1_000);
            state.debit_drift = 7;
        }

        assert!(gate.debit(company, 100, &serde_json::json!({}), "follow-up"));
        assert_eq!(store.state().balances[&company], 893);
    }

    #[test]
    fn test_debit_below_threshold_notifies_once() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store.clone());
        let company = Uuid::new_v4();
        store.state().balances.insert(company, 120);

        assert!(gate.debit(company, 30, &serde_json::json!({}), "a"));
        assert!(gate.debit(company, 30, &serde_json::json!({}), "b"));

        let notifications = store.state().notifications.clone();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].1, NotificationKind::LowCredits);
    }

    #[test]
    fn test_debit_without_ledger_row_fails() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store);
        assert!(!gate.debit(Uuid::new_v4(), 10, &serde_json::json!({}), "x"));
    }
}
