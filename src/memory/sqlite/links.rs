use super::codec::{self, AssociationRow, MemoryRow, RECORD_COLUMNS_NO_EMBEDDING};
use super::repository::{fetch_live, hydrate};
use crate::memory::associations::{
    AssociationType, MemoryAssociation, canonical_pair, clamp_strength,
};
use crate::memory::types::MemoryRecord;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use std::collections::HashMap;

const ASSOCIATION_COLUMNS: &str = "a.source_id, a.target_id, a.association_type, a.strength, \
     a.activation_count, a.last_activated_at, a.created_at";

/// Upsert an undirected edge. A repeated `(pair, type)` overwrites the strength.
///
/// Returns `false` without writing when either endpoint is missing, deleted,
/// or both endpoints are the same record.
pub(super) async fn associate(
    pool: &SqlitePool,
    a: &str,
    b: &str,
    strength: f64,
    association_type: AssociationType,
) -> anyhow::Result<bool> {
    if a == b {
        return Ok(false);
    }
    let (live,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM memories WHERE id IN (?1, ?2) AND deleted_at IS NULL",
    )
    .bind(a)
    .bind(b)
    .fetch_one(pool)
    .await
    .context("check association endpoints")?;
    if live != 2 {
        return Ok(false);
    }

    let (source, target) = canonical_pair(a.to_string(), b.to_string());
    let now_ts = codec::timestamp(Utc::now());
    sqlx::query(
        "INSERT INTO memory_associations
            (source_id, target_id, association_type, strength, activation_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
         ON CONFLICT(source_id, target_id, association_type)
         DO UPDATE SET strength = excluded.strength, updated_at = excluded.updated_at",
    )
    .bind(&source)
    .bind(&target)
    .bind(association_type.to_string())
    .bind(clamp_strength(strength))
    .bind(&now_ts)
    .execute(pool)
    .await
    .context("upsert memory association")?;

    Ok(true)
}

/// Edges touching `id` whose other endpoint is still live, strongest first.
pub(super) async fn associations_for(
    pool: &SqlitePool,
    id: &str,
) -> anyhow::Result<Vec<MemoryAssociation>> {
    let rows: Vec<AssociationRow> = sqlx::query_as(&format!(
        "SELECT {ASSOCIATION_COLUMNS}
         FROM memory_associations a
         JOIN memories o ON o.id = CASE WHEN a.source_id = ?1 THEN a.target_id ELSE a.source_id END
         WHERE (a.source_id = ?1 OR a.target_id = ?1) AND o.deleted_at IS NULL
         ORDER BY a.strength DESC, a.created_at ASC"
    ))
    .bind(id)
    .fetch_all(pool)
    .await
    .context("fetch memory associations")?;

    rows.into_iter().map(codec::row_to_association).collect()
}

pub(super) async fn get_associated(
    pool: &SqlitePool,
    id: &str,
) -> anyhow::Result<Vec<(MemoryRecord, MemoryAssociation)>> {
    if fetch_live(pool, &[id.to_string()], false).await?.is_empty() {
        return Ok(Vec::new());
    }

    let edges = associations_for(pool, id).await?;
    let other_ids: Vec<String> = edges.iter().map(|e| e.other_end(id).to_string()).collect();
    let records = fetch_live(pool, &other_ids, true).await?;

    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            records
                .get(edge.other_end(id))
                .cloned()
                .map(|record| (record, edge))
        })
        .collect())
}

/// Bump every edge of `id` whose other endpoint is still live.
pub(super) async fn touch_associations(pool: &SqlitePool, id: &str) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE memory_associations
         SET activation_count = activation_count + 1, last_activated_at = ?1
         WHERE (source_id = ?2 OR target_id = ?2)
           AND EXISTS (
               SELECT 1 FROM memories o
               WHERE o.deleted_at IS NULL
                 AND o.id = CASE WHEN memory_associations.source_id = ?2
                                 THEN memory_associations.target_id
                                 ELSE memory_associations.source_id END
           )",
    )
    .bind(codec::timestamp(Utc::now()))
    .bind(id)
    .execute(pool)
    .await
    .context("activate memory associations")?;
    Ok(result.rows_affected())
}

pub(super) async fn association_counts(
    pool: &SqlitePool,
    ids: &[String],
) -> anyhow::Result<HashMap<String, u64>> {
    let mut counts: HashMap<String, u64> = ids.iter().map(|id| (id.clone(), 0)).collect();
    if ids.is_empty() {
        return Ok(counts);
    }

    let mut builder = QueryBuilder::new(
        "SELECT x.id, COUNT(*) FROM (
            SELECT source_id AS id, target_id AS other FROM memory_associations
            UNION ALL
            SELECT target_id AS id, source_id AS other FROM memory_associations
         ) x
         JOIN memories o ON o.id = x.other AND o.deleted_at IS NULL
         WHERE x.id IN ",
    );
    codec::push_id_list(&mut builder, ids);
    builder.push(" GROUP BY x.id");

    let rows: Vec<(String, i64)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("count memory associations")?;
    for (id, n) in rows {
        counts.insert(id, u64::try_from(n).unwrap_or(0));
    }
    Ok(counts)
}

pub(super) async fn neighbors_in_window(
    pool: &SqlitePool,
    exclude_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<MemoryRecord>> {
    #[allow(clippy::cast_possible_wrap)]
    let limit_i64 = limit as i64;
    let rows: Vec<MemoryRow> = sqlx::query_as(&format!(
        "SELECT {RECORD_COLUMNS_NO_EMBEDDING} FROM memories m
         WHERE m.id != ?1
           AND m.created_at >= ?2 AND m.created_at <= ?3
           AND m.deleted_at IS NULL AND (m.expires_at IS NULL OR m.expires_at > ?4)
         ORDER BY m.created_at DESC
         LIMIT ?5"
    ))
    .bind(exclude_id)
    .bind(codec::timestamp(from))
    .bind(codec::timestamp(to))
    .bind(codec::timestamp(Utc::now()))
    .bind(limit_i64)
    .fetch_all(pool)
    .await
    .context("fetch temporal neighbors")?;

    hydrate(pool, rows).await
}

pub(super) async fn neighbors_sharing_tags(
    pool: &SqlitePool,
    exclude_id: &str,
    tags: &[String],
    limit: usize,
) -> anyhow::Result<Vec<MemoryRecord>> {
    if tags.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::new(format!(
        "SELECT {RECORD_COLUMNS_NO_EMBEDDING} FROM memories m WHERE m.id != "
    ));
    builder.push_bind(exclude_id);
    builder.push(
        " AND m.id IN (SELECT mt.memory_id FROM memory_tags mt
                       JOIN tags t ON t.id = mt.tag_id WHERE t.name IN ",
    );
    codec::push_id_list(&mut builder, tags);
    builder
        .push(") AND m.deleted_at IS NULL AND (m.expires_at IS NULL OR m.expires_at > ")
        .push_bind(codec::timestamp(Utc::now()))
        .push(") ORDER BY m.created_at DESC LIMIT ");
    #[allow(clippy::cast_possible_wrap)]
    let limit_i64 = limit as i64;
    builder.push_bind(limit_i64);

    let rows: Vec<MemoryRow> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("fetch thematic neighbors")?;

    hydrate(pool, rows).await
}
