//! Poll scheduler
//!
//! Every tick:
//! - reaps stale pending items
//! - pulls due items (oldest first, capped per tick)
//! - backfills orphaned follow-ups
//! - executes the merged batch one item at a time with a pause in between
//!
//! Ticks run on a single task, so a slow tick delays the next one instead
//! of overlapping with it.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::driver::{ExecutionDriver, Outcome};
use crate::orphans::OrphanDetector;
use crate::queue::QueueItem;
use crate::stats::RunStats;
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub max_items_per_tick: i64,
    pub item_pause: Duration,
}

/// Counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub deferred: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub orphans_created: usize,
    pub stale_reaped: usize,
}

pub struct PollScheduler {
    store: Arc<dyn Store>,
    driver: Arc<ExecutionDriver>,
    orphans: Arc<OrphanDetector>,
    stats: Arc<RunStats>,
    settings: SchedulerSettings,
}

impl PollScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        driver: Arc<ExecutionDriver>,
        orphans: Arc<OrphanDetector>,
        stats: Arc<RunStats>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            driver,
            orphans,
            stats,
            settings,
        }
    }

    pub async fn tick(&self) -> Result<TickSummary> {
        let now = Utc::now();
        let mut summary = TickSummary::default();

        match self.orphans.sweep_stale(now) {
            Ok(swept) => {
                summary.stale_reaped = swept;
                self.stats.record_stale(swept);
            }
            Err(e) => warn!("Stale sweep failed: {}", e),
        }

        let pending = self
            .store
            .pending_items(now, self.settings.max_items_per_tick)
            .context("Failed to load pending queue items")?;

        let orphans = match self.orphans.detect(now) {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!("Orphan detection failed: {}", e);
                Vec::new()
            }
        };
        summary.orphans_created = orphans.len();
        self.stats.record_orphans(orphans.len());

        let batch = merge(pending, orphans);
        if batch.is_empty() {
            debug!("No queue items due");
            return Ok(summary);
        }
        info!("Processing {} queue items", batch.len());

        for (index, item) in batch.iter().enumerate() {
            if index > 0 && !self.settings.item_pause.is_zero() {
                tokio::time::sleep(self.settings.item_pause).await;
            }

            let outcome = self.driver.execute(item).await;
            self.stats.record(&outcome);
            summary.processed += 1;
            match outcome {
                Outcome::Sent { .. } => summary.sent += 1,
                Outcome::Failed { .. } => summary.failed += 1,
                Outcome::Deferred { .. } => summary.deferred += 1,
                Outcome::Cancelled(_) => summary.cancelled += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
            }
        }

        info!(
            "Tick done: {} sent, {} failed, {} deferred, {} cancelled, {} skipped",
            summary.sent, summary.failed, summary.deferred, summary.cancelled, summary.skipped
        );
        Ok(summary)
    }

    /// Run ticks until `shutdown` resolves
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(_) => self.stats.tick_completed(Utc::now()),
                Err(e) => {
                    self.stats.tick_failed();
                    error!("Scheduler tick failed: {:#}", e);
                }
            }
        }
    }
}

/// Spawn the poll loop on its own task
pub fn spawn_scheduler(
    scheduler: Arc<PollScheduler>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move { scheduler.run(shutdown).await })
}

/// Pending items first, then orphans, without duplicates
fn merge(pending: Vec<QueueItem>, orphans: Vec<QueueItem>) -> Vec<QueueItem> {
    let mut seen = HashSet::new();
    pending
        .into_iter()
        .chain(orphans)
        .filter(|item| seen.insert(item.id))
        .collect()
}
