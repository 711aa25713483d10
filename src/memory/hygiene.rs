use crate::error::MemoryError;
use crate::memory::consolidation::{RetentionPolicy, RetentionReport, run_retention_sweep};
use crate::memory::forgetting::{
    ForgettingPolicy, ForgettingReport, assess_candidates, execute_forgetting,
};
use crate::memory::traits::Memory;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Single-flight guard for maintenance sweeps.
///
/// Holding the guard is the only way to run a sweep; a second caller is
/// refused instead of queued.
#[derive(Default)]
pub struct SweepGate {
    running: Mutex<()>,
    last: StdMutex<Option<SweepReport>>,
}

pub struct SweepGuard<'a> {
    _held: MutexGuard<'a, ()>,
}

impl SweepGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<SweepGuard<'_>, MemoryError> {
        self.running
            .try_lock()
            .map(|held| SweepGuard { _held: held })
            .map_err(|_| MemoryError::SweepInProgress)
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Report of the most recent completed cycle.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, report: &SweepReport) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Ids soft-deleted because their `expires_at` passed.
    pub expired: Vec<String>,
    pub forgetting: ForgettingReport,
    pub retention: RetentionReport,
    /// Another cycle held the gate; nothing ran.
    pub skipped: bool,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn total_actions(&self) -> usize {
        self.expired.len()
            + self.forgetting.deleted
            + self.forgetting.consolidated
            + self.forgetting.weakened
            + self.retention.consolidated
            + self.retention.deleted
    }
}

/// One full maintenance cycle: expiry purge, forgetting pass, retention sweep.
///
/// The caller must hold the gate's guard. Cancellation stops the cycle at the
/// next record boundary; everything committed so far stays committed.
pub async fn run_cycle(
    store: &dyn Memory,
    gate: &SweepGate,
    _guard: &SweepGuard<'_>,
    forgetting: &ForgettingPolicy,
    retention: RetentionPolicy,
    cancel: &CancellationToken,
) -> Result<SweepReport> {
    let started = Utc::now();
    let mut report = SweepReport {
        started_at: Some(started),
        ..SweepReport::default()
    };

    report.expired = store.purge_expired(started).await?;

    if !cancel.is_cancelled() {
        let candidates = assess_candidates(store, forgetting, cancel).await?;
        report.forgetting = execute_forgetting(store, &candidates, forgetting, cancel).await?;
    }

    if !cancel.is_cancelled() {
        report.retention = run_retention_sweep(store, retention, cancel).await?;
    }

    report.cancelled = cancel.is_cancelled();
    report.finished_at = Some(Utc::now());
    gate.record(&report);

    if report.total_actions() > 0 || report.cancelled {
        tracing::info!(
            expired = report.expired.len(),
            forgotten = report.forgetting.deleted,
            weakened = report.forgetting.weakened,
            consolidated = report.forgetting.consolidated + report.retention.consolidated,
            evicted = report.retention.deleted,
            cancelled = report.cancelled,
            "memory hygiene cycle complete"
        );
    }
    Ok(report)
}
