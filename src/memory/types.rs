use crate::error::MemoryError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 1_000;

/// Storage/retrieval partition of a memory record.
///
/// Also used as the *declared type* of incoming content during encoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryLayer {
    Working,
    #[default]
    Episodic,
    Semantic,
    Procedural,
    Reflective,
}

impl MemoryLayer {
    pub const ALL: [Self; 5] = [
        Self::Working,
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Reflective,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Reflective => "reflective",
        }
    }
}

/// Self-assessment produced by the encoding policy and read by the forgetting sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelfMetadata {
    pub self_assessed_importance: f64,
    pub emotional_marker: f64,
    pub self_relevance: f64,
    pub expected_frequency: f64,
    pub uniqueness: f64,
    pub transferability: f64,
}

/// A persisted memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub layer: MemoryLayer,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub importance: f64,
    pub emotional_weight: f64,
    /// Sorted, de-duplicated.
    pub tags: Vec<String>,
    /// Ids linked to this record by any association, either direction.
    pub related_ids: Vec<String>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub consolidated: bool,
    pub retention_score: f64,
    pub self_metadata: Option<SelfMetadata>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    #[allow(clippy::cast_precision_loss)]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.created_at);
        (age.num_milliseconds().max(0) as f64) / 86_400_000.0
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn shared_tags<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = &'a String> + 'a {
        self.tags
            .iter()
            .filter(move |tag| other.tags.binary_search(tag).is_ok())
    }
}

pub(crate) fn normalize_tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.into().trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Input for [`crate::memory::Memory::add`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub content: String,
    pub layer: MemoryLayer,
    pub importance: f64,
    pub emotional_weight: f64,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub consolidated: bool,
    pub self_metadata: Option<SelfMetadata>,
    pub created_at: Option<DateTime<Utc>>,
    /// `None` applies the layer's default TTL.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, layer: MemoryLayer) -> Self {
        Self {
            content: content.into(),
            layer,
            importance: 0.5,
            emotional_weight: 1.0,
            tags: Vec::new(),
            embedding: None,
            embedding_model: None,
            consolidated: false,
            self_metadata: None,
            created_at: None,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    #[must_use]
    pub fn with_emotional_weight(mut self, weight: f64) -> Self {
        self.emotional_weight = weight;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = normalize_tags(tags);
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>, model: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.embedding_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_consolidated(mut self, consolidated: bool) -> Self {
        self.consolidated = consolidated;
        self
    }

    #[must_use]
    pub fn with_self_metadata(mut self, metadata: SelfMetadata) -> Self {
        self.self_metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::validation("content must not be empty"));
        }
        if !(self.importance.is_finite() && (0.0..=1.0).contains(&self.importance)) {
            return Err(MemoryError::validation("importance must be within [0, 1]"));
        }
        if !(self.emotional_weight.is_finite() && self.emotional_weight >= 0.0) {
            return Err(MemoryError::validation(
                "emotional_weight must be a non-negative number",
            ));
        }
        if let Some(embedding) = &self.embedding
            && (embedding.is_empty() || embedding.iter().any(|x| !x.is_finite()))
        {
            return Err(MemoryError::validation(
                "embedding must be non-empty and finite",
            ));
        }
        Ok(())
    }
}

/// Partial update for [`crate::memory::Memory::update`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub content: Option<String>,
    pub layer: Option<MemoryLayer>,
    pub importance: Option<f64>,
    pub emotional_weight: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub self_metadata: Option<SelfMetadata>,
}

impl RecordUpdate {
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn layer(mut self, layer: MemoryLayer) -> Self {
        self.layer = Some(layer);
        self
    }

    #[must_use]
    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    #[must_use]
    pub fn emotional_weight(mut self, weight: f64) -> Self {
        self.emotional_weight = Some(weight);
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(normalize_tags(tags));
        self
    }

    #[must_use]
    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(MemoryError::validation("content must not be empty"));
        }
        if self
            .importance
            .is_some_and(|v| !(v.is_finite() && (0.0..=1.0).contains(&v)))
        {
            return Err(MemoryError::validation("importance must be within [0, 1]"));
        }
        if self
            .emotional_weight
            .is_some_and(|v| !(v.is_finite() && v >= 0.0))
        {
            return Err(MemoryError::validation(
                "emotional_weight must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Filters shared by lexical, vector and hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub layers: Vec<MemoryLayer>,
    /// Matches records carrying any of these tags.
    pub tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Vector path only; falls back to the configured threshold.
    pub similarity_threshold: Option<f64>,
    /// Hybrid path only; fall back to the configured weights.
    pub vector_weight: Option<f64>,
    pub keyword_weight: Option<f64>,
    /// Bump access counters on returned records. Internal lookups turn this off.
    pub record_access: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            layers: Vec::new(),
            tags: Vec::new(),
            min_importance: None,
            created_after: None,
            created_before: None,
            similarity_threshold: None,
            vector_weight: None,
            keyword_weight: None,
            record_access: true,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn layer(mut self, layer: MemoryLayer) -> Self {
        if !self.layers.contains(&layer) {
            self.layers.push(layer);
        }
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = normalize_tags(tags);
        self
    }

    #[must_use]
    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    #[must_use]
    pub fn max_age(mut self, age: Duration) -> Self {
        self.created_after = Some(Utc::now() - age);
        self
    }

    #[must_use]
    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    #[must_use]
    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn weights(mut self, vector_weight: f64, keyword_weight: f64) -> Self {
        self.vector_weight = Some(vector_weight);
        self.keyword_weight = Some(keyword_weight);
        self
    }

    #[must_use]
    pub fn without_access_tracking(mut self) -> Self {
        self.record_access = false;
        self
    }

    /// Same filters, different limit. Used to widen sub-queries.
    #[must_use]
    pub fn widened(&self, limit: usize) -> Self {
        Self {
            limit,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.limit == 0 || self.limit > MAX_SEARCH_LIMIT {
            return Err(MemoryError::validation(format!(
                "limit must be within 1..={MAX_SEARCH_LIMIT}, got {}",
                self.limit
            )));
        }
        let unit = |name: &str, value: Option<f64>| match value {
            Some(v) if !(v.is_finite() && (0.0..=1.0).contains(&v)) => Err(
                MemoryError::validation(format!("{name} must be within [0, 1], got {v}")),
            ),
            _ => Ok(()),
        };
        unit("min_importance", self.min_importance)?;
        unit("similarity_threshold", self.similarity_threshold)?;
        unit("vector_weight", self.vector_weight)?;
        unit("keyword_weight", self.keyword_weight)?;
        if let (Some(v), Some(k)) = (self.vector_weight, self.keyword_weight)
            && v + k <= f64::EPSILON
        {
            return Err(MemoryError::validation(
                "vector_weight and keyword_weight cannot both be zero",
            ));
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before)
            && after > before
        {
            return Err(MemoryError::validation(
                "created_after must not be later than created_before",
            ));
        }
        Ok(())
    }
}

/// Lexical or vector hit. `score` is the raw BM25 score or cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridHit {
    pub record: MemoryRecord,
    pub vector_score: Option<f64>,
    /// Normalized into [0, 1].
    pub lexical_score: Option<f64>,
    pub combined_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryEventType {
    Created,
    Updated,
    Deleted,
    Consolidated,
    Weakened,
    Expired,
}

/// Append-only audit entry for a record's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: String,
    pub memory_id: String,
    pub event_type: MemoryEventType,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of a single forgetting decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ForgetAction {
    Delete,
    Consolidate,
    Weaken,
    Keep,
}

/// Result of the storage-level retention recomputation for one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionUpdate {
    pub retention_score: f64,
    pub consolidate: bool,
    pub soft_delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub live: u64,
    pub deleted: u64,
    pub consolidated: u64,
    pub with_embedding: u64,
    pub associations: u64,
}
