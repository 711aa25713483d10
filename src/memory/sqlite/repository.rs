use super::EmbedContext;
use super::codec::{self, MemoryRow, RECORD_COLUMNS, RECORD_COLUMNS_NO_EMBEDDING};
use super::events::record_event;
use crate::memory::embeddings::embed_bounded;
use crate::memory::types::{
    ForgetAction, MemoryEventType, MemoryLayer, MemoryRecord, MemoryStats, NewMemory,
    RecordUpdate, RetentionUpdate, normalize_tags,
};
use crate::memory::vector;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};

const REINDEX_BATCH: usize = 64;

pub(super) async fn health_check(pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

// ── Writes ───────────────────────────────────────────────────

fn default_expiry(
    layer: MemoryLayer,
    created_at: DateTime<Utc>,
    working_ttl: Option<chrono::Duration>,
) -> Option<DateTime<Utc>> {
    match layer {
        MemoryLayer::Working => working_ttl.map(|ttl| created_at + ttl),
        _ => None,
    }
}

async fn write_tags(conn: &mut SqliteConnection, memory_id: &str, tags: &[String]) -> anyhow::Result<()> {
    for tag in tags {
        sqlx::query("INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING")
            .bind(tag)
            .execute(&mut *conn)
            .await
            .context("upsert tag")?;
        sqlx::query(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id)
             SELECT ?1, id FROM tags WHERE name = ?2",
        )
        .bind(memory_id)
        .bind(tag)
        .execute(&mut *conn)
        .await
        .context("link tag")?;
    }
    Ok(())
}

/// Insert a batch of records in one transaction.
///
/// Missing embeddings are computed up front in a single provider call; a
/// provider outage stores the records without vectors.
pub(super) async fn insert_records(
    pool: &SqlitePool,
    embed: &EmbedContext<'_>,
    working_ttl: Option<chrono::Duration>,
    memories: Vec<NewMemory>,
) -> anyhow::Result<Vec<MemoryRecord>> {
    for memory in &memories {
        memory.validate()?;
    }
    if memories.is_empty() {
        return Ok(Vec::new());
    }

    let pending: Vec<&str> = memories
        .iter()
        .filter(|m| m.embedding.is_none())
        .map(|m| m.content.as_str())
        .collect();
    let mut computed = embed_texts(pool, embed, &pending).await?.into_iter();

    let now = Utc::now();
    let now_ts = codec::timestamp(now);
    let mut records = Vec::with_capacity(memories.len());

    let mut tx = pool.begin().await.context("begin insert transaction")?;
    for memory in memories {
        let (embedding, embedding_model) = match memory.embedding {
            Some(vector) => (
                Some(vector),
                memory
                    .embedding_model
                    .or_else(|| Some(embed.embedder.model().to_string())),
            ),
            None => {
                let vector = computed.next().flatten();
                let model = vector.as_ref().map(|_| embed.embedder.model().to_string());
                (vector, model)
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let tags = normalize_tags(memory.tags);
        let created_at = memory.created_at.unwrap_or(now);
        let expires_at = memory
            .expires_at
            .or_else(|| default_expiry(memory.layer, created_at, working_ttl));

        sqlx::query(
            "INSERT INTO memories (
                id, layer, content, embedding, embedding_model, importance, emotional_weight,
                consolidated, retention_score, self_metadata, created_at, updated_at, expires_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1.0, ?9, ?10, ?11, ?12)",
        )
        .bind(&id)
        .bind(memory.layer.as_str())
        .bind(&memory.content)
        .bind(embedding.as_deref().map(vector::vec_to_bytes))
        .bind(embedding_model.as_deref())
        .bind(memory.importance)
        .bind(memory.emotional_weight)
        .bind(memory.consolidated)
        .bind(codec::metadata_to_json(memory.self_metadata.as_ref())?)
        .bind(codec::timestamp(created_at))
        .bind(&now_ts)
        .bind(expires_at.map(codec::timestamp))
        .execute(&mut *tx)
        .await
        .context("insert memory")?;

        write_tags(&mut tx, &id, &tags).await?;
        record_event(
            &mut *tx,
            &id,
            MemoryEventType::Created,
            Some(memory.layer.as_str()),
            &now_ts,
        )
        .await?;

        records.push(MemoryRecord {
            id,
            layer: memory.layer,
            content: memory.content,
            embedding,
            embedding_model,
            importance: memory.importance,
            emotional_weight: memory.emotional_weight,
            tags,
            related_ids: Vec::new(),
            access_count: 0,
            last_accessed_at: None,
            consolidated: memory.consolidated,
            retention_score: 1.0,
            self_metadata: memory.self_metadata,
            created_at,
            expires_at,
            deleted_at: None,
        });
    }
    tx.commit().await.context("commit insert transaction")?;

    tracing::debug!(count = records.len(), "memories stored");
    Ok(records)
}

pub(super) async fn update_record(
    pool: &SqlitePool,
    embed: &EmbedContext<'_>,
    id: &str,
    update: RecordUpdate,
) -> anyhow::Result<bool> {
    update.validate()?;
    if update.is_empty() {
        return Ok(get_record(pool, id, false).await?.is_some());
    }

    // Re-embed before opening the transaction so no write lock is held across the provider call.
    let new_embedding = match update.content.as_deref() {
        Some(content) => Some(embed_texts(pool, embed, &[content]).await?.pop().flatten()),
        None => None,
    };

    let now_ts = codec::timestamp(Utc::now());
    let mut tx = pool.begin().await.context("begin update transaction")?;

    let mut changed: Vec<&str> = Vec::new();
    let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE memories SET updated_at = ");
    builder.push_bind(now_ts.clone());

    if let Some(content) = update.content {
        let embedding = new_embedding.flatten();
        let model = embedding.as_ref().map(|_| embed.embedder.model().to_string());
        builder.push(", content = ").push_bind(content);
        // A stale vector must never outlive the text it was computed from.
        builder
            .push(", embedding = ")
            .push_bind(embedding.as_deref().map(vector::vec_to_bytes));
        builder.push(", embedding_model = ").push_bind(model);
        changed.push("content");
    }
    if let Some(layer) = update.layer {
        builder.push(", layer = ").push_bind(layer.as_str());
        changed.push("layer");
    }
    if let Some(importance) = update.importance {
        builder.push(", importance = ").push_bind(importance);
        changed.push("importance");
    }
    if let Some(weight) = update.emotional_weight {
        builder.push(", emotional_weight = ").push_bind(weight);
        changed.push("emotional_weight");
    }
    if let Some(expires_at) = update.expires_at {
        builder
            .push(", expires_at = ")
            .push_bind(expires_at.map(codec::timestamp));
        changed.push("expires_at");
    }
    if let Some(metadata) = update.self_metadata {
        builder
            .push(", self_metadata = ")
            .push_bind(codec::metadata_to_json(Some(&metadata))?);
        changed.push("self_metadata");
    }
    // Liveness is checked here, not in a prior SELECT: the write lock must be
    // taken by the transaction's first statement.
    builder.push(" WHERE id = ").push_bind(id);
    builder
        .push(" AND deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ")
        .push_bind(now_ts.clone())
        .push(")");
    let result = builder
        .build()
        .execute(&mut *tx)
        .await
        .context("update memory")?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    if let Some(tags) = update.tags {
        sqlx::query("DELETE FROM memory_tags WHERE memory_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("clear memory tags")?;
        write_tags(&mut tx, id, &normalize_tags(tags)).await?;
        changed.push("tags");
    }

    record_event(
        &mut *tx,
        id,
        MemoryEventType::Updated,
        Some(&changed.join(",")),
        &now_ts,
    )
    .await?;
    tx.commit().await.context("commit update transaction")?;
    Ok(true)
}

pub(super) async fn delete_record(pool: &SqlitePool, id: &str) -> anyhow::Result<bool> {
    let now_ts = codec::timestamp(Utc::now());
    let mut tx = pool.begin().await.context("begin delete transaction")?;

    let result = sqlx::query(
        "UPDATE memories SET deleted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ?1)",
    )
    .bind(&now_ts)
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("soft delete memory")?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    record_event(&mut *tx, id, MemoryEventType::Deleted, None, &now_ts).await?;
    tx.commit().await.context("commit delete transaction")?;
    Ok(true)
}

// ── Reads ────────────────────────────────────────────────────

async fn load_tags(pool: &SqlitePool, ids: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut builder = QueryBuilder::new(
        "SELECT mt.memory_id, t.name FROM memory_tags mt
         JOIN tags t ON t.id = mt.tag_id
         WHERE mt.memory_id IN ",
    );
    codec::push_id_list(&mut builder, ids);
    builder.push(" ORDER BY t.name");

    let rows: Vec<(String, String)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("load memory tags")?;

    let mut tags: HashMap<String, Vec<String>> = HashMap::new();
    for (memory_id, name) in rows {
        tags.entry(memory_id).or_default().push(name);
    }
    Ok(tags)
}

async fn load_related(
    pool: &SqlitePool,
    ids: &[String],
) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut builder = QueryBuilder::new(
        "SELECT a.source_id, a.target_id FROM memory_associations a
         JOIN memories s ON s.id = a.source_id AND s.deleted_at IS NULL
         JOIN memories t ON t.id = a.target_id AND t.deleted_at IS NULL
         WHERE a.source_id IN ",
    );
    codec::push_id_list(&mut builder, ids);
    builder.push(" OR a.target_id IN ");
    codec::push_id_list(&mut builder, ids);

    let rows: Vec<(String, String)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("load related memory ids")?;

    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut related: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (source, target) in rows {
        if wanted.contains(source.as_str()) {
            related.entry(source.clone()).or_default().insert(target.clone());
        }
        if wanted.contains(target.as_str()) {
            related.entry(target).or_default().insert(source);
        }
    }
    Ok(related
        .into_iter()
        .map(|(id, set)| (id, set.into_iter().collect()))
        .collect())
}

/// Attach tags and related ids to raw rows, preserving row order.
pub(super) async fn hydrate(pool: &SqlitePool, rows: Vec<MemoryRow>) -> anyhow::Result<Vec<MemoryRecord>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut tags = load_tags(pool, &ids).await?;
    let mut related = load_related(pool, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let row_tags = tags.remove(&row.id).unwrap_or_default();
            let row_related = related.remove(&row.id).unwrap_or_default();
            codec::row_to_record(row, row_tags, row_related)
        })
        .collect()
}

/// Live, non-expired records for `ids`, keyed by id.
pub(super) async fn fetch_live(
    pool: &SqlitePool,
    ids: &[String],
    with_embedding: bool,
) -> anyhow::Result<HashMap<String, MemoryRecord>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let columns = if with_embedding {
        RECORD_COLUMNS
    } else {
        RECORD_COLUMNS_NO_EMBEDDING
    };
    let mut builder = QueryBuilder::new(format!("SELECT {columns} FROM memories m WHERE m.id IN "));
    codec::push_id_list(&mut builder, ids);
    builder
        .push(" AND m.deleted_at IS NULL AND (m.expires_at IS NULL OR m.expires_at > ")
        .push_bind(codec::timestamp(Utc::now()))
        .push(")");

    let rows: Vec<MemoryRow> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("fetch memories by id")?;

    Ok(hydrate(pool, rows)
        .await?
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect())
}

/// Atomically bump access counters. Returns the timestamp written.
pub(super) async fn touch_records(pool: &SqlitePool, ids: &[String]) -> anyhow::Result<DateTime<Utc>> {
    let now = Utc::now();
    if ids.is_empty() {
        return Ok(now);
    }
    let mut builder = QueryBuilder::new(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ",
    );
    builder.push_bind(codec::timestamp(now));
    builder.push(" WHERE deleted_at IS NULL AND id IN ");
    codec::push_id_list(&mut builder, ids);
    builder
        .build()
        .execute(pool)
        .await
        .context("record memory access")?;
    Ok(now)
}

/// Reflect a completed [`touch_records`] on an already-loaded record.
pub(super) fn mark_accessed(record: &mut MemoryRecord, at: DateTime<Utc>) {
    record.access_count = record.access_count.saturating_add(1);
    record.last_accessed_at = Some(at);
}

pub(super) async fn get_record(
    pool: &SqlitePool,
    id: &str,
    touch: bool,
) -> anyhow::Result<Option<MemoryRecord>> {
    let ids = [id.to_string()];
    let Some(mut record) = fetch_live(pool, &ids, true).await?.remove(id) else {
        return Ok(None);
    };
    if touch {
        let at = touch_records(pool, &ids).await?;
        mark_accessed(&mut record, at);
    }
    Ok(Some(record))
}

// ── Sweep support ────────────────────────────────────────────

pub(super) async fn sweep_candidates(
    pool: &SqlitePool,
    after_id: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<MemoryRecord>> {
    #[allow(clippy::cast_possible_wrap)]
    let limit_i64 = limit as i64;
    let rows: Vec<MemoryRow> = sqlx::query_as(&format!(
        "SELECT {RECORD_COLUMNS_NO_EMBEDDING} FROM memories m
         WHERE m.deleted_at IS NULL AND (m.expires_at IS NULL OR m.expires_at > ?1)
           AND m.id > ?2
         ORDER BY m.id
         LIMIT ?3"
    ))
    .bind(codec::timestamp(Utc::now()))
    .bind(after_id.unwrap_or(""))
    .bind(limit_i64)
    .fetch_all(pool)
    .await
    .context("page sweep candidates")?;

    hydrate(pool, rows).await
}

pub(super) async fn apply_forget_action(
    pool: &SqlitePool,
    id: &str,
    action: ForgetAction,
    weaken_factor: f64,
) -> anyhow::Result<bool> {
    let now_ts = codec::timestamp(Utc::now());
    let mut tx = pool.begin().await.context("begin forget transaction")?;

    let (result, event) = match action {
        ForgetAction::Keep => {
            let live: Option<(String,)> =
                sqlx::query_as("SELECT id FROM memories WHERE id = ?1 AND deleted_at IS NULL")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("lookup memory")?;
            return Ok(live.is_some());
        }
        ForgetAction::Delete => (
            sqlx::query(
                "UPDATE memories SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL AND consolidated = 0",
            )
            .bind(&now_ts)
            .bind(id)
            .execute(&mut *tx)
            .await,
            MemoryEventType::Deleted,
        ),
        ForgetAction::Consolidate => (
            sqlx::query(
                "UPDATE memories SET consolidated = 1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
            )
            .bind(&now_ts)
            .bind(id)
            .execute(&mut *tx)
            .await,
            MemoryEventType::Consolidated,
        ),
        ForgetAction::Weaken => (
            sqlx::query(
                "UPDATE memories
                 SET importance = MIN(1.0, MAX(0.0, importance * ?1)),
                     retention_score = MIN(1.0, MAX(0.0, retention_score * ?1)),
                     updated_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
            )
            .bind(weaken_factor)
            .bind(&now_ts)
            .bind(id)
            .execute(&mut *tx)
            .await,
            MemoryEventType::Weakened,
        ),
    };

    let result = result.with_context(|| format!("apply {action} to memory"))?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }
    record_event(&mut *tx, id, event, Some("forgetting"), &now_ts).await?;
    tx.commit().await.context("commit forget transaction")?;
    Ok(true)
}

pub(super) async fn apply_retention(
    pool: &SqlitePool,
    id: &str,
    update: RetentionUpdate,
) -> anyhow::Result<bool> {
    let now_ts = codec::timestamp(Utc::now());
    let mut tx = pool.begin().await.context("begin retention transaction")?;

    // Consolidation wins over deletion, including records consolidated earlier.
    let result = sqlx::query(
        "UPDATE memories
         SET retention_score = ?1,
             updated_at = ?2,
             consolidated = CASE WHEN ?3 THEN 1 ELSE consolidated END,
             deleted_at = CASE WHEN ?4 AND NOT ?3 AND consolidated = 0 THEN ?2 ELSE deleted_at END
         WHERE id = ?5 AND deleted_at IS NULL",
    )
    .bind(update.retention_score.clamp(0.0, 1.0))
    .bind(&now_ts)
    .bind(update.consolidate)
    .bind(update.soft_delete)
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("apply retention")?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    if update.consolidate {
        record_event(&mut *tx, id, MemoryEventType::Consolidated, Some("retention"), &now_ts)
            .await?;
    } else if update.soft_delete {
        let (deleted,): (bool,) =
            sqlx::query_as("SELECT deleted_at IS NOT NULL FROM memories WHERE id = ?1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("read retention outcome")?;
        if deleted {
            record_event(&mut *tx, id, MemoryEventType::Deleted, Some("retention"), &now_ts)
                .await?;
        }
    }

    tx.commit().await.context("commit retention transaction")?;
    Ok(true)
}

pub(super) async fn purge_expired(pool: &SqlitePool, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
    let now_ts = codec::timestamp(now);
    let mut tx = pool.begin().await.context("begin expiry transaction")?;

    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE memories SET deleted_at = ?1, updated_at = ?1
         WHERE deleted_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?1
         RETURNING id",
    )
    .bind(&now_ts)
    .fetch_all(&mut *tx)
    .await
    .context("purge expired memories")?;

    let mut ids = Vec::with_capacity(rows.len());
    for (id,) in rows {
        record_event(&mut *tx, &id, MemoryEventType::Expired, None, &now_ts).await?;
        ids.push(id);
    }
    tx.commit().await.context("commit expiry transaction")?;

    if !ids.is_empty() {
        tracing::info!(count = ids.len(), "expired memories purged");
    }
    Ok(ids)
}

// ── Maintenance ──────────────────────────────────────────────

/// Rebuild the FTS5 index and back-fill embeddings that are missing.
pub(super) async fn reindex(pool: &SqlitePool, embed: &EmbedContext<'_>) -> anyhow::Result<usize> {
    sqlx::raw_sql("INSERT INTO memories_fts(memories_fts) VALUES('rebuild');")
        .execute(pool)
        .await
        .context("rebuild FTS5 index")?;

    if !embed.embedder.is_available() {
        return Ok(0);
    }

    let entries: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, content FROM memories WHERE embedding IS NULL AND deleted_at IS NULL",
    )
    .fetch_all(pool)
    .await
    .context("fetch entries for reindex")?;

    let model = embed.embedder.model().to_string();
    let mut count = 0;
    for chunk in entries.chunks(REINDEX_BATCH) {
        let texts: Vec<&str> = chunk.iter().map(|(_, content)| content.as_str()).collect();
        let vectors = embed_texts(pool, embed, &texts).await?;
        for ((id, _), vector) in chunk.iter().zip(vectors) {
            let Some(vector) = vector else {
                continue;
            };
            sqlx::query("UPDATE memories SET embedding = ?1, embedding_model = ?2 WHERE id = ?3")
                .bind(vector::vec_to_bytes(&vector))
                .bind(&model)
                .bind(id)
                .execute(pool)
                .await
                .context("update embedding during reindex")?;
            count += 1;
        }
    }

    tracing::info!(embedded = count, pending = entries.len(), "memory reindex finished");
    Ok(count)
}

pub(super) async fn stats(pool: &SqlitePool) -> anyhow::Result<MemoryStats> {
    let (live, deleted, consolidated, with_embedding): (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ?1)
                         THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN deleted_at IS NULL AND consolidated = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN deleted_at IS NULL AND embedding IS NOT NULL
                         THEN 1 ELSE 0 END), 0)
         FROM memories",
    )
    .bind(codec::timestamp(Utc::now()))
    .fetch_one(pool)
    .await
    .context("count memories")?;

    let (associations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memory_associations")
        .fetch_one(pool)
        .await
        .context("count associations")?;

    let count = |n: i64| u64::try_from(n).unwrap_or(0);
    Ok(MemoryStats {
        live: count(live),
        deleted: count(deleted),
        consolidated: count(consolidated),
        with_embedding: count(with_embedding),
        associations: count(associations),
    })
}

// ── Embedding cache ──────────────────────────────────────────

fn content_hash(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Embed `texts` through the LRU cache. One slot per input; provider
/// failures leave slots empty, store failures are errors.
pub(super) async fn embed_texts(
    pool: &SqlitePool,
    embed: &EmbedContext<'_>,
    texts: &[&str],
) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
    let mut slots = vec![None; texts.len()];
    if texts.is_empty() || !embed.embedder.is_available() {
        return Ok(slots);
    }

    let model = embed.embedder.model();
    let dims = embed.embedder.dimensions();
    let now_ts = codec::timestamp(Utc::now());
    let hashes: Vec<String> = texts.iter().map(|text| content_hash(model, text)).collect();

    let mut misses = Vec::new();
    for (i, hash) in hashes.iter().enumerate() {
        let cached: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT embedding FROM embedding_cache WHERE content_hash = ?1")
                .bind(hash)
                .fetch_optional(pool)
                .await
                .context("embedding cache lookup")?;

        if let Some((bytes,)) = cached
            && bytes.len() == dims * 4
        {
            sqlx::query("UPDATE embedding_cache SET accessed_at = ?1 WHERE content_hash = ?2")
                .bind(&now_ts)
                .bind(hash)
                .execute(pool)
                .await
                .context("update embedding cache access time")?;
            slots[i] = Some(vector::bytes_to_vec(&bytes));
            continue;
        }
        misses.push(i);
    }
    if misses.is_empty() {
        return Ok(slots);
    }

    let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();
    let computed = embed_bounded(embed.embedder, &miss_texts, embed.timeout).await;

    let mut stored = false;
    for (&i, vector) in misses.iter().zip(computed) {
        let Some(vector) = vector else {
            continue;
        };
        sqlx::query(
            "INSERT OR REPLACE INTO embedding_cache
                (content_hash, model, embedding, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&hashes[i])
        .bind(model)
        .bind(vector::vec_to_bytes(&vector))
        .bind(&now_ts)
        .execute(pool)
        .await
        .context("insert embedding into cache")?;
        slots[i] = Some(vector);
        stored = true;
    }

    if stored {
        #[allow(clippy::cast_possible_wrap)]
        let max = embed.cache_max as i64;
        sqlx::query(
            "DELETE FROM embedding_cache WHERE content_hash IN (
                SELECT content_hash FROM embedding_cache
                ORDER BY accessed_at ASC
                LIMIT MAX(0, (SELECT COUNT(*) FROM embedding_cache) - ?1)
            )",
        )
        .bind(max)
        .execute(pool)
        .await
        .context("evict excess embedding cache entries")?;
    }

    Ok(slots)
}
