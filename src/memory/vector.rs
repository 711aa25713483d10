// Vector operations: cosine similarity, blob codec, hybrid fusion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cosine similarity between two vectors. Returns 0.0–1.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || denom < f64::EPSILON {
        return 0.0;
    }

    let raw = dot / denom;
    if !raw.is_finite() {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    let sim = raw.clamp(0.0, 1.0) as f32;
    sim
}

/// Serialize f32 vector to bytes (little-endian)
pub fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for &f in v {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

/// Deserialize bytes to f32 vector (little-endian)
pub fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Linear clamp of a raw BM25 score into [0, 1], assuming raw scores live in `[0, ceiling]`.
pub fn normalize_lexical_score(raw: f32, ceiling: f32) -> f32 {
    if !raw.is_finite() || ceiling <= 0.0 {
        return 0.0;
    }
    (raw / ceiling).clamp(0.0, 1.0)
}

/// Closed set of fusion strategies, selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `vector·wV + lexical·wL` over normalized scores.
    #[default]
    Weighted,
    /// Position-based Reciprocal Rank Fusion (k = 60).
    ReciprocalRank,
}

/// A scored result for hybrid merging
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub id: String,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub final_score: f32,
}

/// Collects per-id scores in first-seen order so that ties keep their input ranking.
#[derive(Default)]
struct UnionBuilder {
    order: Vec<String>,
    slots: HashMap<String, (Option<f32>, Option<f32>, f32)>,
}

impl UnionBuilder {
    fn entry(&mut self, id: &str) -> &mut (Option<f32>, Option<f32>, f32) {
        if !self.slots.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.slots.entry(id.to_string()).or_insert((None, None, 0.0))
    }

    fn finish(mut self, limit: usize) -> Vec<ScoredResult> {
        let mut results: Vec<ScoredResult> = self
            .order
            .into_iter()
            .filter_map(|id| {
                self.slots
                    .remove(&id)
                    .map(|(vector_score, keyword_score, final_score)| ScoredResult {
                        id,
                        vector_score,
                        keyword_score,
                        final_score,
                    })
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        results
    }
}

/// Weighted fusion over the union of both result lists.
///
/// `keyword_results` must already be normalized into [0, 1]. An id missing
/// from one list contributes 0 for that side.
pub fn hybrid_merge(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    vector_weight: f32,
    keyword_weight: f32,
    limit: usize,
) -> Vec<ScoredResult> {
    let mut union = UnionBuilder::default();

    // Lexical first: with no vector hits the output order equals the lexical order.
    for (id, score) in keyword_results {
        let slot = union.entry(id);
        slot.1 = Some(*score);
        slot.2 += keyword_weight * score;
    }
    for (id, score) in vector_results {
        let slot = union.entry(id);
        slot.0 = Some(*score);
        slot.2 += vector_weight * score;
    }

    union.finish(limit)
}

/// Reciprocal Rank Fusion: combine ranked lists using position-based scoring.
pub fn rrf_merge(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    limit: usize,
) -> Vec<ScoredResult> {
    const K: f32 = 60.0;

    let rrf = |rank: usize| {
        let rank_1based = u16::try_from(rank.saturating_add(1)).unwrap_or(u16::MAX);
        1.0 / (K + f32::from(rank_1based))
    };

    let mut union = UnionBuilder::default();
    for (rank, (id, score)) in keyword_results.iter().enumerate() {
        let slot = union.entry(id);
        slot.1 = Some(*score);
        slot.2 += rrf(rank);
    }
    for (rank, (id, score)) in vector_results.iter().enumerate() {
        let slot = union.entry(id);
        slot.0 = Some(*score);
        slot.2 += rrf(rank);
    }

    union.finish(limit)
}

pub fn fuse(
    strategy: FusionStrategy,
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    vector_weight: f32,
    keyword_weight: f32,
    limit: usize,
) -> Vec<ScoredResult> {
    match strategy {
        FusionStrategy::Weighted => hybrid_merge(
            vector_results,
            keyword_results,
            vector_weight,
            keyword_weight,
            limit,
        ),
        FusionStrategy::ReciprocalRank => rrf_merge(vector_results, keyword_results, limit),
    }
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::approx_constant,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;

    fn ids(results: &[ScoredResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn vec_bytes_roundtrip() {
        let original = vec![1.0_f32, -2.5, 3.14, 0.0, f32::MAX];
        let bytes = vec_to_bytes(&original);
        assert_eq!(bytes.len(), original.len() * 4);
        assert_eq!(bytes_to_vec(&bytes), original);
    }

    #[test]
    fn lexical_normalization_clamps_into_unit_range() {
        assert_eq!(normalize_lexical_score(5.0, 10.0), 0.5);
        assert_eq!(normalize_lexical_score(25.0, 10.0), 1.0);
        assert_eq!(normalize_lexical_score(-1.0, 10.0), 0.0);
        assert_eq!(normalize_lexical_score(f32::NAN, 10.0), 0.0);
    }

    #[test]
    fn hybrid_merge_is_a_union_not_an_intersection() {
        let vector = vec![("1".to_string(), 0.9), ("2".to_string(), 0.8)];
        let lexical = vec![("2".to_string(), 0.7), ("3".to_string(), 0.6)];
        let merged = hybrid_merge(&vector, &lexical, 0.6, 0.4, 10);

        let mut got = ids(&merged);
        got.sort_unstable();
        assert_eq!(got, vec!["1", "2", "3"]);

        let two = merged.iter().find(|r| r.id == "2").unwrap();
        assert!((two.final_score - (0.8 * 0.6 + 0.7 * 0.4)).abs() < 1e-6);
        let three = merged.iter().find(|r| r.id == "3").unwrap();
        assert_eq!(three.vector_score, None);
        assert!((three.final_score - 0.6 * 0.4).abs() < 1e-6);
    }

    #[test]
    fn hybrid_merge_sorts_descending_and_truncates() {
        let vector = vec![("a".to_string(), 0.2), ("b".to_string(), 0.95)];
        let lexical = vec![("c".to_string(), 1.0)];
        let merged = hybrid_merge(&vector, &lexical, 0.6, 0.4, 2);
        assert_eq!(ids(&merged), vec!["b", "c"]);
    }

    #[test]
    fn hybrid_merge_keeps_lexical_order_without_vectors() {
        let lexical = vec![
            ("x".to_string(), 1.0),
            ("y".to_string(), 1.0),
            ("z".to_string(), 0.5),
        ];
        let merged = hybrid_merge(&[], &lexical, 0.6, 0.4, 10);
        assert_eq!(ids(&merged), vec!["x", "y", "z"]);
    }

    #[test]
    fn rrf_merge_basic_fusion() {
        let vector_results = vec![("a".into(), 0.95), ("b".into(), 0.90)];
        let keyword_results = vec![("b".into(), 3.0), ("c".into(), 2.5)];
        let merged = rrf_merge(&vector_results, &keyword_results, 10);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "b");
    }

    #[test]
    fn fuse_dispatches_on_strategy() {
        let vector = vec![("a".to_string(), 1.0)];
        let lexical = vec![("b".to_string(), 1.0)];
        let weighted = fuse(FusionStrategy::Weighted, &vector, &lexical, 0.6, 0.4, 10);
        assert_eq!(weighted[0].id, "a");
        let rrf = fuse(FusionStrategy::ReciprocalRank, &vector, &lexical, 0.6, 0.4, 10);
        assert_eq!(rrf.len(), 2);
        assert!((rrf[0].final_score - rrf[1].final_score).abs() < 1e-9);
    }
}
