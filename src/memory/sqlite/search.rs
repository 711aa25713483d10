use super::EmbedContext;
use super::codec;
use super::repository::{embed_texts, fetch_live, mark_accessed, touch_records};
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::memory::embeddings::EmbeddingProvider;
use crate::memory::types::{HybridHit, MAX_SEARCH_LIMIT, MemoryRecord, SearchHit, SearchOptions};
use crate::memory::vector;
use anyhow::Context;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Build an FTS5 expression that ORs every word as a quoted phrase.
///
/// Words without a single alphanumeric character are dropped; `None` means
/// nothing is left to match.
fn fts_query(query: &str) -> Option<String> {
    let mut fts = String::with_capacity(query.len() + 16);
    for word in query
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
    {
        if !fts.is_empty() {
            fts.push_str(" OR ");
        }
        fts.push('"');
        fts.push_str(&word.replace('"', "\"\""));
        fts.push('"');
    }
    (!fts.is_empty()).then_some(fts)
}

/// Appends the live-record predicate plus every caller filter. Expects a
/// preceding `WHERE` clause that the caller opened.
fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, opts: &'a SearchOptions) {
    builder
        .push(" AND m.deleted_at IS NULL AND (m.expires_at IS NULL OR m.expires_at > ")
        .push_bind(codec::timestamp(Utc::now()))
        .push(")");

    if !opts.layers.is_empty() {
        builder.push(" AND m.layer IN (");
        let mut separated = builder.separated(", ");
        for layer in &opts.layers {
            separated.push_bind(layer.as_str());
        }
        separated.push_unseparated(")");
    }
    if !opts.tags.is_empty() {
        builder.push(
            " AND m.id IN (SELECT mt.memory_id FROM memory_tags mt
                           JOIN tags t ON t.id = mt.tag_id WHERE t.name IN ",
        );
        codec::push_id_list(builder, &opts.tags);
        builder.push(")");
    }
    if let Some(min) = opts.min_importance {
        builder.push(" AND m.importance >= ").push_bind(min);
    }
    if let Some(after) = opts.created_after {
        builder
            .push(" AND m.created_at >= ")
            .push_bind(codec::timestamp(after));
    }
    if let Some(before) = opts.created_before {
        builder
            .push(" AND m.created_at <= ")
            .push_bind(codec::timestamp(before));
    }
}

/// FTS5 search. Returns `(id, bm25)` pairs, best first, with scores flipped
/// so that larger is better.
async fn lexical_candidates(
    pool: &SqlitePool,
    query: &str,
    opts: &SearchOptions,
) -> anyhow::Result<Vec<(String, f32)>> {
    let Some(fts) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let mut builder = QueryBuilder::new(
        "SELECT m.id, bm25(memories_fts) AS score
         FROM memories_fts f
         JOIN memories m ON m.rowid = f.rowid
         WHERE memories_fts MATCH ",
    );
    builder.push_bind(fts);
    push_filters(&mut builder, opts);
    #[allow(clippy::cast_possible_wrap)]
    let limit_i64 = opts.limit as i64;
    builder.push(" ORDER BY score LIMIT ").push_bind(limit_i64);

    let rows: Vec<(String, f64)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("FTS5 search query")?;

    #[allow(clippy::cast_possible_truncation)]
    let results = rows
        .into_iter()
        .map(|(id, score)| (id, (-score) as f32))
        .collect();
    Ok(results)
}

/// Brute-force cosine over a bounded candidate set.
///
/// Candidates are the `limit × multiplier` most important filtered records
/// carrying a vector. Returns `(id, similarity)` pairs at or above `threshold`.
async fn vector_candidates(
    pool: &SqlitePool,
    query_embedding: &[f32],
    opts: &SearchOptions,
    threshold: f32,
    multiplier: usize,
) -> anyhow::Result<Vec<(String, f32)>> {
    let mut builder = QueryBuilder::new(
        "SELECT m.id, m.embedding FROM memories m WHERE m.embedding IS NOT NULL",
    );
    push_filters(&mut builder, opts);
    #[allow(clippy::cast_possible_wrap)]
    let candidates = opts.limit.saturating_mul(multiplier) as i64;
    builder
        .push(" ORDER BY m.importance DESC, m.created_at DESC LIMIT ")
        .push_bind(candidates);

    let rows: Vec<(String, Vec<u8>)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("vector search query")?;

    let mut scored: Vec<(String, f32)> = Vec::with_capacity(rows.len());
    for (id, blob) in rows {
        let embedding = vector::bytes_to_vec(&blob);
        let sim = vector::cosine_similarity(query_embedding, &embedding);
        if sim > 0.0 && sim >= threshold {
            scored.push((id, sim));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(opts.limit);
    Ok(scored)
}

/// Embed the query (through the cache) and run the vector path. A missing
/// query vector yields no candidates rather than an error.
async fn semantic_candidates(
    pool: &SqlitePool,
    embed: &EmbedContext<'_>,
    query: &str,
    opts: &SearchOptions,
    threshold: f32,
    multiplier: usize,
) -> anyhow::Result<Vec<(String, f32)>> {
    let Some(query_embedding) = embed_texts(pool, embed, &[query]).await?.pop().flatten() else {
        return Ok(Vec::new());
    };
    vector_candidates(pool, &query_embedding, opts, threshold, multiplier).await
}

/// Load and pair records with scores, keeping the ranking order; touches
/// them when `record_access` is set. Ids that vanished between ranking and
/// loading are skipped.
async fn materialize<T>(
    pool: &SqlitePool,
    ranked: Vec<(String, T)>,
    record_access: bool,
) -> anyhow::Result<Vec<(MemoryRecord, T)>> {
    let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
    let mut records = fetch_live(pool, &ids, true).await?;
    let accessed_at = if record_access {
        let found: Vec<String> = ids.into_iter().filter(|id| records.contains_key(id)).collect();
        Some(touch_records(pool, &found).await?)
    } else {
        None
    };

    Ok(ranked
        .into_iter()
        .filter_map(|(id, score)| {
            records.remove(&id).map(|mut record| {
                if let Some(at) = accessed_at {
                    mark_accessed(&mut record, at);
                }
                (record, score)
            })
        })
        .collect())
}

pub(super) async fn search(
    pool: &SqlitePool,
    query: &str,
    opts: &SearchOptions,
) -> anyhow::Result<Vec<SearchHit>> {
    opts.validate()?;
    let ranked = lexical_candidates(pool, query, opts).await?;
    Ok(materialize(pool, ranked, opts.record_access)
        .await?
        .into_iter()
        .map(|(record, score)| SearchHit {
            record,
            score: f64::from(score),
        })
        .collect())
}

pub(super) async fn search_by_vector(
    pool: &SqlitePool,
    config: &MemoryConfig,
    embedder: &dyn EmbeddingProvider,
    query_embedding: &[f32],
    opts: &SearchOptions,
) -> anyhow::Result<Vec<SearchHit>> {
    opts.validate()?;
    if query_embedding.is_empty() || query_embedding.iter().any(|x| !x.is_finite()) {
        return Err(MemoryError::validation("query vector must be non-empty and finite").into());
    }
    if embedder.is_available() && query_embedding.len() != embedder.dimensions() {
        return Err(MemoryError::Embedding(format!(
            "query vector has {} dimensions, store expects {}",
            query_embedding.len(),
            embedder.dimensions()
        ))
        .into());
    }

    #[allow(clippy::cast_possible_truncation)]
    let threshold = opts
        .similarity_threshold
        .unwrap_or(config.similarity_threshold) as f32;
    let ranked = vector_candidates(
        pool,
        query_embedding,
        opts,
        threshold,
        config.vector_candidate_multiplier,
    )
    .await?;

    Ok(materialize(pool, ranked, opts.record_access)
        .await?
        .into_iter()
        .map(|(record, score)| SearchHit {
            record,
            score: f64::from(score),
        })
        .collect())
}

/// Vector and lexical retrieval run concurrently, each widened to twice
/// the requested limit, then fused over the union of both lists.
///
/// An unavailable or slow embedding provider degrades to lexical-only
/// results. Only a failure of both sub-queries is an error.
pub(super) async fn hybrid_search(
    pool: &SqlitePool,
    embed: &EmbedContext<'_>,
    config: &MemoryConfig,
    query: &str,
    opts: &SearchOptions,
) -> anyhow::Result<Vec<HybridHit>> {
    opts.validate()?;
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let widened = opts.widened(opts.limit.saturating_mul(2).min(MAX_SEARCH_LIMIT));
    #[allow(clippy::cast_possible_truncation)]
    let threshold = opts
        .similarity_threshold
        .unwrap_or(config.similarity_threshold) as f32;

    let lexical = lexical_candidates(pool, query, &widened);
    let semantic = semantic_candidates(
        pool,
        embed,
        query,
        &widened,
        threshold,
        config.vector_candidate_multiplier,
    );
    let (lexical, semantic) = tokio::join!(lexical, semantic);

    let (lexical, semantic) = match (lexical, semantic) {
        (Ok(lexical), Ok(semantic)) => (lexical, semantic),
        (Ok(lexical), Err(e)) => {
            tracing::warn!("vector retrieval failed, using lexical results only: {e:#}");
            (lexical, Vec::new())
        }
        (Err(e), Ok(semantic)) => {
            tracing::warn!("lexical retrieval failed, using vector results only: {e:#}");
            (Vec::new(), semantic)
        }
        (Err(e), Err(_)) => return Err(e),
    };

    #[allow(clippy::cast_possible_truncation)]
    let ceiling = config.lexical_score_ceiling as f32;
    let lexical: Vec<(String, f32)> = lexical
        .into_iter()
        .map(|(id, raw)| (id, vector::normalize_lexical_score(raw, ceiling)))
        .collect();

    #[allow(clippy::cast_possible_truncation)]
    let (vector_weight, keyword_weight) = match (opts.vector_weight, opts.keyword_weight) {
        (None, None) => config.fusion_weights(),
        (v, k) => (
            v.unwrap_or(config.vector_weight) as f32,
            k.unwrap_or(config.keyword_weight) as f32,
        ),
    };

    let fused = vector::fuse(
        config.fusion_strategy,
        &semantic,
        &lexical,
        vector_weight,
        keyword_weight,
        opts.limit,
    );
    tracing::debug!(
        lexical = lexical.len(),
        vector = semantic.len(),
        fused = fused.len(),
        "hybrid search"
    );

    let ranked: Vec<(String, vector::ScoredResult)> =
        fused.into_iter().map(|r| (r.id.clone(), r)).collect();
    Ok(materialize(pool, ranked, opts.record_access)
        .await?
        .into_iter()
        .map(|(record, scored)| HybridHit {
            record,
            vector_score: scored.vector_score.map(f64::from),
            lexical_score: scored.keyword_score.map(f64::from),
            combined_score: f64::from(scored.final_score),
        })
        .collect())
}
