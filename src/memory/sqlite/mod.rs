mod codec;
mod events;
mod links;
mod repository;
mod schema;
mod search;

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::associations::{AssociationType, MemoryAssociation};
use crate::memory::embeddings::{EmbeddingProvider, NoopEmbedding};
use crate::memory::traits::Memory;
use crate::memory::types::{
    ForgetAction, HybridHit, MemoryEvent, MemoryRecord, MemoryStats, NewMemory, RecordUpdate,
    RetentionUpdate, SearchHit, SearchOptions,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Everything the write and query paths need to turn text into vectors.
struct EmbedContext<'a> {
    embedder: &'a dyn EmbeddingProvider,
    cache_max: usize,
    timeout: Duration,
}

/// SQLite-backed persistent memory.
///
/// - **Records**: one row per memory, soft-deleted via `deleted_at`
/// - **Vector search**: embeddings stored as BLOB, brute-force cosine over a bounded candidate set
/// - **Keyword search**: FTS5 virtual table with BM25 scoring
/// - **Hybrid merge**: weighted union (or RRF) of both result lists
/// - **Associations**: undirected typed edges with activation counters
/// - **Embedding cache**: LRU-evicted cache to avoid redundant provider calls
pub struct SqliteMemory {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryConfig,
    db_path: Option<PathBuf>,
}

impl SqliteMemory {
    /// Open (or create) the database at `<workspace_dir>/memory/hippocampus.db`
    /// without an embedding provider.
    pub async fn new(workspace_dir: &Path, config: MemoryConfig) -> anyhow::Result<Self> {
        Self::with_embedder(workspace_dir, Arc::new(NoopEmbedding), config).await
    }

    pub async fn with_embedder(
        workspace_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let db_path = workspace_dir.join("memory").join("hippocampus.db");

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create memory directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Store(format!("open {}: {e}", db_path.display())))?;

        schema::init_schema(&pool).await?;
        tracing::debug!(path = %db_path.display(), provider = embedder.name(), "memory store opened");

        Ok(Self {
            pool,
            embedder,
            config,
            db_path: Some(db_path),
        })
    }

    /// Open a private in-memory database without an embedding provider.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::in_memory_with_embedder(Arc::new(NoopEmbedding), MemoryConfig::default()).await
    }

    /// Open a private in-memory database.
    ///
    /// Every pooled connection to `sqlite::memory:` is a separate database,
    /// so the pool is pinned to a single long-lived connection.
    pub async fn in_memory_with_embedder(
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parse in-memory SQLite URL")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Store(format!("open in-memory SQLite: {e}")))?;
        schema::init_schema(&pool).await?;
        Ok(Self {
            pool,
            embedder,
            config,
            db_path: None,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Wait for in-flight queries and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn embed_context(&self) -> EmbedContext<'_> {
        EmbedContext {
            embedder: self.embedder.as_ref(),
            cache_max: self.config.embedding_cache_size,
            timeout: Duration::from_millis(self.config.embedding_timeout_ms),
        }
    }

    fn working_ttl(&self) -> Option<chrono::Duration> {
        self.config
            .working_ttl_hours
            .filter(|hours| *hours > 0)
            .map(|hours| chrono::Duration::hours(i64::from(hours)))
    }
}

#[async_trait]
impl Memory for SqliteMemory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn health_check(&self) -> bool {
        repository::health_check(&self.pool).await
    }

    async fn add(&self, memory: NewMemory) -> anyhow::Result<MemoryRecord> {
        let mut records = repository::insert_records(
            &self.pool,
            &self.embed_context(),
            self.working_ttl(),
            vec![memory],
        )
        .await?;
        records.pop().context("insert returned no record")
    }

    async fn add_batch(&self, memories: Vec<NewMemory>) -> anyhow::Result<Vec<MemoryRecord>> {
        repository::insert_records(&self.pool, &self.embed_context(), self.working_ttl(), memories)
            .await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<MemoryRecord>> {
        repository::get_record(&self.pool, id, true).await
    }

    async fn peek(&self, id: &str) -> anyhow::Result<Option<MemoryRecord>> {
        repository::get_record(&self.pool, id, false).await
    }

    async fn update(&self, id: &str, update: RecordUpdate) -> anyhow::Result<bool> {
        repository::update_record(&self.pool, &self.embed_context(), id, update).await
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        repository::delete_record(&self.pool, id).await
    }

    async fn search(&self, query: &str, opts: &SearchOptions) -> anyhow::Result<Vec<SearchHit>> {
        search::search(&self.pool, query, opts).await
    }

    async fn search_by_vector(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> anyhow::Result<Vec<SearchHit>> {
        search::search_by_vector(&self.pool, &self.config, self.embedder.as_ref(), vector, opts)
            .await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> anyhow::Result<Vec<HybridHit>> {
        search::hybrid_search(&self.pool, &self.embed_context(), &self.config, query, opts).await
    }

    async fn associate(
        &self,
        a: &str,
        b: &str,
        strength: f64,
        association_type: AssociationType,
    ) -> anyhow::Result<bool> {
        links::associate(&self.pool, a, b, strength, association_type).await
    }

    async fn get_associated(
        &self,
        id: &str,
    ) -> anyhow::Result<Vec<(MemoryRecord, MemoryAssociation)>> {
        links::get_associated(&self.pool, id).await
    }

    async fn associations_for(&self, id: &str) -> anyhow::Result<Vec<MemoryAssociation>> {
        links::associations_for(&self.pool, id).await
    }

    async fn touch_associations(&self, id: &str) -> anyhow::Result<u64> {
        links::touch_associations(&self.pool, id).await
    }

    async fn neighbors_in_window(
        &self,
        exclude_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        links::neighbors_in_window(&self.pool, exclude_id, from, to, limit).await
    }

    async fn neighbors_sharing_tags(
        &self,
        exclude_id: &str,
        tags: &[String],
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        links::neighbors_sharing_tags(&self.pool, exclude_id, tags, limit).await
    }

    async fn sweep_candidates(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        repository::sweep_candidates(&self.pool, after_id, limit).await
    }

    async fn association_counts(&self, ids: &[String]) -> anyhow::Result<HashMap<String, u64>> {
        links::association_counts(&self.pool, ids).await
    }

    async fn apply_forget_action(
        &self,
        id: &str,
        action: ForgetAction,
        weaken_factor: f64,
    ) -> anyhow::Result<bool> {
        repository::apply_forget_action(&self.pool, id, action, weaken_factor).await
    }

    async fn apply_retention(&self, id: &str, update: RetentionUpdate) -> anyhow::Result<bool> {
        repository::apply_retention(&self.pool, id, update).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        repository::purge_expired(&self.pool, now).await
    }

    async fn events_for(&self, id: &str) -> anyhow::Result<Vec<MemoryEvent>> {
        events::events_for(&self.pool, id).await
    }

    async fn reindex(&self) -> anyhow::Result<usize> {
        repository::reindex(&self.pool, &self.embed_context()).await
    }

    async fn stats(&self) -> anyhow::Result<MemoryStats> {
        repository::stats(&self.pool).await
    }
}
