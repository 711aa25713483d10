use crate::memory::associations::{AssociationType, clamp_strength};
use crate::memory::traits::Memory;
use crate::memory::types::{MemoryRecord, SearchOptions};
use anyhow::Result;
use chrono::Duration;
use std::collections::HashSet;

pub const TEMPORAL_STRENGTH: f64 = 0.5;
pub const THEMATIC_STRENGTH: f64 = 0.6;

/// Attribute similarity between two records, independent of content.
#[allow(clippy::cast_precision_loss)]
pub fn similarity_strength(a: &MemoryRecord, b: &MemoryRecord) -> f64 {
    let same_layer = if a.layer == b.layer { 0.2 } else { 0.0 };
    let shared_tags = a.shared_tags(b).count() as f64;
    let importance_gap = (a.importance - b.importance).abs();
    let weight_gap = (a.emotional_weight - b.emotional_weight).abs();

    clamp_strength(
        same_layer
            + 0.1 * shared_tags
            + 0.2 * (1.0 - importance_gap)
            + 0.1 * (1.0 - weight_gap),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub similar: usize,
    pub temporal: usize,
    pub thematic: usize,
}

impl LinkReport {
    pub fn total(&self) -> usize {
        self.similar + self.temporal + self.thematic
    }
}

/// Link `record` to its neighbours.
///
/// Similarity candidates come from a same-layer hybrid query on the record's
/// content and become `similar` edges at or above `threshold`. Records created
/// within a day either side get a `temporal` edge and records sharing a tag a
/// `thematic` edge, both only when the pair is not linked yet. Every write is
/// an upsert, so running this twice does not duplicate edges.
pub async fn auto_associate(
    store: &dyn Memory,
    record: &MemoryRecord,
    threshold: f64,
    neighbor_limit: usize,
) -> Result<LinkReport> {
    let mut report = LinkReport::default();
    let mut linked: HashSet<String> = record.related_ids.iter().cloned().collect();

    let opts = SearchOptions::with_limit(neighbor_limit.saturating_add(1).max(2))
        .layer(record.layer)
        .without_access_tracking();
    let candidates = store.hybrid_search(&record.content, &opts).await?;
    for hit in candidates {
        let candidate = hit.record;
        if candidate.id == record.id {
            continue;
        }
        let strength = similarity_strength(record, &candidate);
        if strength >= threshold
            && store
                .associate(&record.id, &candidate.id, strength, AssociationType::Similar)
                .await?
        {
            linked.insert(candidate.id);
            report.similar += 1;
        }
    }

    let window = Duration::hours(24);
    let neighbours = store
        .neighbors_in_window(
            &record.id,
            record.created_at - window,
            record.created_at + window,
            neighbor_limit,
        )
        .await?;
    for neighbour in neighbours {
        if linked.contains(&neighbour.id) {
            continue;
        }
        if store
            .associate(&record.id, &neighbour.id, TEMPORAL_STRENGTH, AssociationType::Temporal)
            .await?
        {
            linked.insert(neighbour.id);
            report.temporal += 1;
        }
    }

    let themed = store
        .neighbors_sharing_tags(&record.id, &record.tags, neighbor_limit)
        .await?;
    for neighbour in themed {
        if linked.contains(&neighbour.id) {
            continue;
        }
        if store
            .associate(&record.id, &neighbour.id, THEMATIC_STRENGTH, AssociationType::Thematic)
            .await?
        {
            linked.insert(neighbour.id);
            report.thematic += 1;
        }
    }

    tracing::debug!(
        id = %record.id,
        similar = report.similar,
        temporal = report.temporal,
        thematic = report.thematic,
        "auto-association finished"
    );
    Ok(report)
}
