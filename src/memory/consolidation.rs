use crate::config::MemoryConfig;
use crate::memory::traits::Memory;
use crate::memory::types::{MemoryRecord, RetentionUpdate};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const MS_PER_DAY: f64 = 86_400_000.0;
const USAGE_BOOST_RATE: f64 = 0.1;
const CONSOLIDATION_BONUS: f64 = 1.3;
const CONSOLIDATE_IMPORTANCE: f64 = 0.8;
const CONSOLIDATE_ACCESS_COUNT: u64 = 5;
const SWEEP_PAGE_SIZE: usize = 256;

/// Direction of the age term in [`retention_score`].
///
/// `Literal` multiplies by `1 - exp(-age_days)`, so retention *grows* with
/// age. `Inverted` multiplies by `exp(-age_days)`, a conventional forgetting
/// curve. Literal stays the default so stored scores remain comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionDecayMode {
    #[default]
    Literal,
    Inverted,
}

/// `importance · emotional_weight · (1 + ln(1 + access)·0.1) · age_term · bonus`,
/// clamped into [0, 1].
#[allow(clippy::cast_precision_loss)]
pub fn retention_score(
    importance: f64,
    emotional_weight: f64,
    access_count: u64,
    age_ms: f64,
    consolidated: bool,
    mode: RetentionDecayMode,
) -> f64 {
    let usage_boost = (1.0 + access_count as f64).ln() * USAGE_BOOST_RATE;
    let time_decay = (-age_ms.max(0.0) / MS_PER_DAY).exp();
    let age_term = match mode {
        RetentionDecayMode::Literal => 1.0 - time_decay,
        RetentionDecayMode::Inverted => time_decay,
    };
    let bonus = if consolidated { CONSOLIDATION_BONUS } else { 1.0 };

    let score = importance * emotional_weight * (1.0 + usage_boost) * age_term * bonus;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub delete_threshold: f64,
    pub mode: RetentionDecayMode,
}

impl RetentionPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            delete_threshold: config.retention_delete_threshold,
            mode: config.retention_decay_mode,
        }
    }

    /// Recompute one record. Consolidation is decided first and shields the
    /// record from eviction in the same pass.
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, record: &MemoryRecord, now: DateTime<Utc>) -> RetentionUpdate {
        let promote = !record.consolidated
            && (record.importance > CONSOLIDATE_IMPORTANCE
                || record.access_count > CONSOLIDATE_ACCESS_COUNT);
        let consolidated = record.consolidated || promote;

        let age_ms = now
            .signed_duration_since(record.created_at)
            .num_milliseconds()
            .max(0) as f64;
        let score = retention_score(
            record.importance,
            record.emotional_weight,
            record.access_count,
            age_ms,
            consolidated,
            self.mode,
        );

        RetentionUpdate {
            retention_score: score,
            consolidate: promote,
            soft_delete: !consolidated && score < self.delete_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub scanned: usize,
    pub consolidated: usize,
    pub deleted: usize,
    pub cancelled: bool,
}

/// Walk every live record in id order and persist its recomputed retention.
///
/// Each record is updated in its own statement; cancellation is checked
/// between records and leaves already-committed updates in place. A store
/// failure aborts the walk.
pub async fn run_retention_sweep(
    store: &dyn Memory,
    policy: RetentionPolicy,
    cancel: &CancellationToken,
) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    let mut after: Option<String> = None;

    'pages: loop {
        let page = store
            .sweep_candidates(after.as_deref(), SWEEP_PAGE_SIZE)
            .await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.id.clone());
        let exhausted = page.len() < SWEEP_PAGE_SIZE;

        for record in &page {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break 'pages;
            }
            let update = policy.evaluate(record, Utc::now());
            if !store.apply_retention(&record.id, update).await? {
                continue;
            }
            report.scanned += 1;
            if update.consolidate {
                report.consolidated += 1;
            } else if update.soft_delete {
                report.deleted += 1;
            }
        }

        if exhausted {
            break;
        }
    }

    tracing::info!(
        scanned = report.scanned,
        consolidated = report.consolidated,
        deleted = report.deleted,
        cancelled = report.cancelled,
        "retention sweep finished"
    );
    Ok(report)
}
