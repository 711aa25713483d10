use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::associations::{AssociationType, MemoryAssociation};
pub use super::types::{
    ForgetAction, HybridHit, MemoryEvent, MemoryLayer, MemoryRecord, MemoryStats, NewMemory,
    RecordUpdate, RetentionUpdate, SearchHit, SearchOptions,
};

/// Persistent, searchable memory store.
///
/// Every read path excludes soft-deleted and expired records. Reads through
/// `get`, `search`, `search_by_vector` and `hybrid_search` bump each returned
/// record's access counters.
#[async_trait]
pub trait Memory: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> bool;

    // ── Records ──────────────────────────────────────────────

    async fn add(&self, memory: NewMemory) -> anyhow::Result<MemoryRecord>;

    /// Embeds every record lacking a vector in one provider call.
    async fn add_batch(&self, memories: Vec<NewMemory>) -> anyhow::Result<Vec<MemoryRecord>>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<MemoryRecord>>;

    /// Like `get` but leaves access counters untouched.
    async fn peek(&self, id: &str) -> anyhow::Result<Option<MemoryRecord>>;

    /// Returns `false` when the record does not exist or was deleted.
    async fn update(&self, id: &str, update: RecordUpdate) -> anyhow::Result<bool>;

    /// Soft delete. Returns `false` when the record was already gone.
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;

    // ── Retrieval ────────────────────────────────────────────

    async fn search(&self, query: &str, opts: &SearchOptions) -> anyhow::Result<Vec<SearchHit>>;

    async fn search_by_vector(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> anyhow::Result<Vec<SearchHit>>;

    async fn hybrid_search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> anyhow::Result<Vec<HybridHit>>;

    // ── Associations ─────────────────────────────────────────

    /// Upserts the edge. Returns `false` when either endpoint is missing.
    async fn associate(
        &self,
        a: &str,
        b: &str,
        strength: f64,
        association_type: AssociationType,
    ) -> anyhow::Result<bool>;

    /// Linked live records, strongest association first.
    async fn get_associated(
        &self,
        id: &str,
    ) -> anyhow::Result<Vec<(MemoryRecord, MemoryAssociation)>>;

    async fn associations_for(&self, id: &str) -> anyhow::Result<Vec<MemoryAssociation>>;

    /// Bumps `activation_count` on every edge touching `id`; returns the number of edges.
    async fn touch_associations(&self, id: &str) -> anyhow::Result<u64>;

    /// Live records created in `[from, to]`, excluding `exclude_id`.
    async fn neighbors_in_window(
        &self,
        exclude_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Live records carrying any of `tags`, excluding `exclude_id`.
    async fn neighbors_sharing_tags(
        &self,
        exclude_id: &str,
        tags: &[String],
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>>;

    // ── Sweep support ────────────────────────────────────────

    /// Keyset page of live, non-expired records ordered by id, without embeddings.
    async fn sweep_candidates(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Association counts for the given ids (ids with no edges map to 0).
    async fn association_counts(
        &self,
        ids: &[String],
    ) -> anyhow::Result<std::collections::HashMap<String, u64>>;

    /// Applies one forgetting action atomically. Returns `false` if the record vanished.
    async fn apply_forget_action(
        &self,
        id: &str,
        action: ForgetAction,
        weaken_factor: f64,
    ) -> anyhow::Result<bool>;

    async fn apply_retention(&self, id: &str, update: RetentionUpdate) -> anyhow::Result<bool>;

    /// Soft-deletes records whose `expires_at` has passed. Returns their ids.
    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>>;

    // ── Maintenance ──────────────────────────────────────────

    async fn events_for(&self, id: &str) -> anyhow::Result<Vec<MemoryEvent>>;

    /// Rebuilds the lexical index and back-fills missing embeddings.
    async fn reindex(&self) -> anyhow::Result<usize>;

    async fn stats(&self) -> anyhow::Result<MemoryStats>;
}
