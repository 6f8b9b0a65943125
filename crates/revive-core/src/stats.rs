//! Running totals for the status endpoint

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::driver::Outcome;

#[derive(Debug, Default)]
pub struct RunStats {
    sent: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    deferred: AtomicU64,
    skipped: AtomicU64,
    orphans_created: AtomicU64,
    stale_reaped: AtomicU64,
    ticks: AtomicU64,
    tick_failures: AtomicU64,
    /// Millis since epoch, 0 when nothing ran yet
    last_execution: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub deferred: u64,
    pub skipped: u64,
    pub orphans_created: u64,
    pub stale_reaped: u64,
    pub ticks: u64,
    pub tick_failures: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Sent { .. } => &self.sent,
            Outcome::Failed { .. } => &self.failed,
            Outcome::Cancelled(_) => &self.cancelled,
            Outcome::Deferred { .. } => &self.deferred,
            Outcome::Skipped(_) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphans(&self, count: usize) {
        self.orphans_created
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_stale(&self, count: usize) {
        self.stale_reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tick_completed(&self, at: DateTime<Utc>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_execution
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_execution.load(Ordering::Relaxed);
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            orphans_created: self.orphans_created.load(Ordering::Relaxed),
            stale_reaped: self.stale_reaped.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
            last_execution: (last > 0)
                .then(|| Utc.timestamp_millis_opt(last).single())
                .flatten(),
        }
    }
}
