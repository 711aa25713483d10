use crate::config::MemoryConfig;
use crate::memory::traits::Memory;
use crate::memory::types::{ForgetAction, MemoryRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const AGE_HORIZON_DAYS: f64 = 30.0;
const ACCESS_HORIZON: f64 = 10.0;
const ASSOCIATION_HORIZON: f64 = 5.0;
const DEFAULT_SELF_ASSESSED_IMPORTANCE: f64 = 0.5;
const ASSESS_PAGE_SIZE: usize = 256;

/// `0.3·age + 0.25·disuse + 0.2·(1-importance) + 0.15·(1-self_assessed) + 0.1·isolation`.
///
/// A missing self-assessment counts as 0.5.
#[allow(clippy::cast_precision_loss)]
pub fn forget_score(
    age_days: f64,
    access_count: u64,
    importance: f64,
    self_assessed_importance: Option<f64>,
    association_count: u64,
) -> f64 {
    let age_term = (age_days.max(0.0) / AGE_HORIZON_DAYS).min(1.0);
    let access_term = (1.0 - access_count as f64 / ACCESS_HORIZON).max(0.0);
    let self_assessed = self_assessed_importance.unwrap_or(DEFAULT_SELF_ASSESSED_IMPORTANCE);
    let isolation_term = (1.0 - association_count as f64 / ASSOCIATION_HORIZON).max(0.0);

    0.3 * age_term
        + 0.25 * access_term
        + 0.2 * (1.0 - importance)
        + 0.15 * (1.0 - self_assessed)
        + 0.1 * isolation_term
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgettingCandidate {
    pub id: String,
    pub forget_score: f64,
    pub suggested_action: ForgetAction,
    pub importance: f64,
    pub consolidated: bool,
    pub age_days: f64,
    pub access_count: u64,
    pub association_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForgettingPolicy {
    pub delete_threshold: f64,
    pub consolidate_threshold: f64,
    pub weaken_factor: f64,
    pub max_actions: Option<usize>,
}

impl Default for ForgettingPolicy {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl ForgettingPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            delete_threshold: config.forget_delete_threshold,
            consolidate_threshold: config.forget_consolidate_threshold,
            weaken_factor: config.forget_weaken_factor,
            max_actions: config.max_forget_actions,
        }
    }

    /// Consolidated records are never deleted; a delete verdict weakens them instead.
    pub fn decide(&self, score: f64, importance: f64, consolidated: bool) -> ForgetAction {
        if score > self.delete_threshold {
            if consolidated {
                ForgetAction::Weaken
            } else {
                ForgetAction::Delete
            }
        } else if score > self.consolidate_threshold {
            if importance > 0.5 {
                ForgetAction::Consolidate
            } else {
                ForgetAction::Weaken
            }
        } else {
            ForgetAction::Keep
        }
    }

    pub fn assess(
        &self,
        record: &MemoryRecord,
        association_count: u64,
        now: DateTime<Utc>,
    ) -> ForgettingCandidate {
        let age_days = record.age_days(now);
        let score = forget_score(
            age_days,
            record.access_count,
            record.importance,
            record
                .self_metadata
                .map(|meta| meta.self_assessed_importance),
            association_count,
        );

        ForgettingCandidate {
            id: record.id.clone(),
            forget_score: score,
            suggested_action: self.decide(score, record.importance, record.consolidated),
            importance: record.importance,
            consolidated: record.consolidated,
            age_days,
            access_count: record.access_count,
            association_count,
        }
    }
}

/// Score every live record, highest forget score first.
pub async fn assess_candidates(
    store: &dyn Memory,
    policy: &ForgettingPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<ForgettingCandidate>> {
    let now = Utc::now();
    let mut candidates = Vec::new();
    let mut after: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let page = store.sweep_candidates(after.as_deref(), ASSESS_PAGE_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.id.clone());

        let ids: Vec<String> = page.iter().map(|r| r.id.clone()).collect();
        let counts = store.association_counts(&ids).await?;
        for record in &page {
            let count = counts.get(&record.id).copied().unwrap_or(0);
            candidates.push(policy.assess(record, count, now));
        }

        if page.len() < ASSESS_PAGE_SIZE {
            break;
        }
    }

    candidates.sort_by(|a, b| {
        b.forget_score
            .partial_cmp(&a.forget_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(candidates)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgettingReport {
    pub deleted: usize,
    pub consolidated: usize,
    pub weakened: usize,
    pub kept: usize,
    /// Records that vanished between assessment and execution.
    pub missing: usize,
    /// Actions left undone because of the per-cycle cap or cancellation.
    pub deferred: usize,
    pub cancelled: bool,
}

/// Apply each candidate's suggested action, in the given order.
///
/// `keep` verdicts cost nothing and never count against `max_actions`.
/// Store failures abort the run; actions already applied stay applied.
pub async fn execute_forgetting(
    store: &dyn Memory,
    candidates: &[ForgettingCandidate],
    policy: &ForgettingPolicy,
    cancel: &CancellationToken,
) -> Result<ForgettingReport> {
    let mut report = ForgettingReport::default();
    let mut applied = 0usize;

    for candidate in candidates {
        let action = candidate.suggested_action;
        if action == ForgetAction::Keep {
            report.kept += 1;
            continue;
        }
        if report.cancelled || policy.max_actions.is_some_and(|max| applied >= max) {
            report.deferred += 1;
            continue;
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
            report.deferred += 1;
            continue;
        }

        if !store
            .apply_forget_action(&candidate.id, action, policy.weaken_factor)
            .await?
        {
            report.missing += 1;
            continue;
        }
        applied += 1;
        match action {
            ForgetAction::Delete => report.deleted += 1,
            ForgetAction::Consolidate => report.consolidated += 1,
            ForgetAction::Weaken => report.weakened += 1,
            ForgetAction::Keep => {}
        }
    }

    tracing::info!(
        deleted = report.deleted,
        consolidated = report.consolidated,
        weakened = report.weakened,
        kept = report.kept,
        deferred = report.deferred,
        "forgetting pass finished"
    );
    Ok(report)
}
