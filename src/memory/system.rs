use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::consolidation::{RetentionPolicy, RetentionReport, run_retention_sweep};
use crate::memory::encoding::{EncodingContext, EncodingDecision, self_referential_encode};
use crate::memory::forgetting::{
    ForgettingCandidate, ForgettingPolicy, ForgettingReport, assess_candidates,
    execute_forgetting,
};
use crate::memory::hygiene::{SweepGate, SweepReport, run_cycle};
use crate::memory::linking::{LinkReport, auto_associate};
use crate::memory::traits::Memory;
use crate::memory::types::{ForgetAction, MemoryLayer, MemoryRecord};
use crate::memory::working::WorkingMemory;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of [`MemorySystem::remember`].
#[derive(Debug, Clone)]
pub struct Remembered {
    pub record: MemoryRecord,
    pub decision: EncodingDecision,
    pub links: LinkReport,
    /// Id pushed out of working memory by this activation.
    pub evicted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub evicted: Option<String>,
    pub associations_touched: u64,
}

/// Encoding, association, working memory and the sweeps over one store.
///
/// The store handle is injected; the system owns only process-local state
/// (the working set and the sweep gate).
pub struct MemorySystem {
    store: Arc<dyn Memory>,
    config: MemoryConfig,
    working: WorkingMemory,
    gate: SweepGate,
}

impl MemorySystem {
    pub fn new(store: Arc<dyn Memory>, config: MemoryConfig) -> Self {
        let working = WorkingMemory::new(config.working_memory_capacity);
        Self {
            store,
            config,
            working,
            gate: SweepGate::new(),
        }
    }

    pub fn store(&self) -> &dyn Memory {
        self.store.as_ref()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn gate(&self) -> &SweepGate {
        &self.gate
    }

    pub fn self_referential_encode(
        &self,
        content: &str,
        declared: MemoryLayer,
        context: &EncodingContext,
    ) -> EncodingDecision {
        self_referential_encode(content, declared, context)
    }

    /// Encode, persist, link and activate `content` in one call.
    pub async fn remember(
        &self,
        content: &str,
        declared: MemoryLayer,
        context: &EncodingContext,
    ) -> Result<Remembered> {
        let decision = self_referential_encode(content, declared, context);
        let record = self
            .store
            .add(decision.clone().into_new_memory(content, &context.tags))
            .await?;

        let links = auto_associate(
            self.store.as_ref(),
            &record,
            self.config.association_threshold,
            self.config.association_neighbor_limit,
        )
        .await?;
        let activation = self.activate(&record.id).await?;

        tracing::debug!(
            id = %record.id,
            layer = %record.layer,
            importance = record.importance,
            links = links.total(),
            "memory encoded"
        );
        Ok(Remembered {
            record,
            decision,
            links,
            evicted: activation.evicted,
        })
    }

    /// Link an existing record to its neighbours. `threshold` defaults to the
    /// configured association threshold.
    pub async fn auto_associate(&self, id: &str, threshold: Option<f64>) -> Result<LinkReport> {
        let record = self
            .store
            .peek(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        let threshold = threshold.unwrap_or(self.config.association_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(
                MemoryError::validation(format!("threshold must be within [0, 1], got {threshold}"))
                    .into(),
            );
        }
        auto_associate(
            self.store.as_ref(),
            &record,
            threshold,
            self.config.association_neighbor_limit,
        )
        .await
    }

    pub async fn activate(&self, id: &str) -> Result<Activation> {
        if self.store.peek(id).await?.is_none() {
            return Err(MemoryError::NotFound(id.to_string()).into());
        }
        let evicted = self.working.activate(id);
        let associations_touched = self.store.touch_associations(id).await?;
        Ok(Activation {
            evicted,
            associations_touched,
        })
    }

    /// Working-set ids, oldest first.
    pub fn working_set(&self) -> Vec<String> {
        self.working.snapshot()
    }

    pub fn forgetting_policy(&self) -> ForgettingPolicy {
        ForgettingPolicy::from_config(&self.config)
    }

    pub async fn assess_forgetting_candidates(&self) -> Result<Vec<ForgettingCandidate>> {
        assess_candidates(
            self.store.as_ref(),
            &self.forgetting_policy(),
            &CancellationToken::new(),
        )
        .await
    }

    /// Fails with [`MemoryError::SweepInProgress`] while another sweep runs.
    pub async fn execute_forgetting(
        &self,
        candidates: &[ForgettingCandidate],
    ) -> Result<ForgettingReport> {
        let _guard = self.gate.try_acquire()?;
        let report = execute_forgetting(
            self.store.as_ref(),
            candidates,
            &self.forgetting_policy(),
            &CancellationToken::new(),
        )
        .await?;
        for candidate in candidates
            .iter()
            .filter(|c| c.suggested_action == ForgetAction::Delete)
        {
            if self.working.contains(&candidate.id) && self.store.peek(&candidate.id).await?.is_none()
            {
                self.working.remove(&candidate.id);
            }
        }
        Ok(report)
    }

    /// Storage-level retention sweep. Fails with
    /// [`MemoryError::SweepInProgress`] while another sweep runs.
    pub async fn apply_forgetting(&self) -> Result<RetentionReport> {
        let _guard = self.gate.try_acquire()?;
        run_retention_sweep(
            self.store.as_ref(),
            RetentionPolicy::from_config(&self.config),
            &CancellationToken::new(),
        )
        .await
    }

    /// Full maintenance cycle. An overlapping trigger is coalesced into the
    /// running one and gets a report with `skipped` set.
    pub async fn run_forgetting_cycle(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let Ok(guard) = self.gate.try_acquire() else {
            tracing::debug!("memory sweep already running; trigger coalesced");
            return Ok(SweepReport::skipped());
        };
        let report = run_cycle(
            self.store.as_ref(),
            &self.gate,
            &guard,
            &self.forgetting_policy(),
            RetentionPolicy::from_config(&self.config),
            cancel,
        )
        .await?;
        for id in &report.expired {
            self.working.remove(id);
        }
        Ok(report)
    }
}
