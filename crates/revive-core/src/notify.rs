//! Operator notifications with a per-(company, kind) cooldown

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::NotificationKind;
use crate::store::Store;

pub struct Notifier {
    store: Arc<dyn Store>,
    cooldown: Duration,
    last_sent: Mutex<HashMap<(Uuid, NotificationKind), DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, cooldown: Duration) -> Self {
        Self {
            store,
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Record a notification unless one of the same kind went out for this
    /// company within the cooldown. Returns whether a row was written.
    pub fn notify(
        &self,
        company_id: Uuid,
        kind: NotificationKind,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> bool {
        {
            let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
            let key = (company_id, kind);
            if let Some(previous) = last_sent.get(&key) {
                if now - *previous < self.cooldown {
                    debug!(
                        "Suppressing {} notification for company {} (cooldown)",
                        kind.as_str(),
                        company_id
                    );
                    return false;
                }
            }
            last_sent.insert(key, now);
        }

        match self.store.insert_notification(company_id, kind, title, body) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to record {} notification for company {}: {}",
                    kind.as_str(),
                    company_id,
                    e
                );
                false
            }
        }
    }
}
