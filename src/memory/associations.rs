use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Describes how two memory records are related.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssociationType {
    /// Attribute-level similarity (type, tags, importance, emotional weight).
    Similar,
    /// One record led to the other.
    Causal,
    /// Created within the same window of time.
    Temporal,
    /// Parent/child relation between summary and detail.
    Hierarchical,
    /// Shares at least one tag.
    Thematic,
}

/// An edge between two memory records.
///
/// Stored with `source_id <= target_id`, so callers may query by either
/// endpoint and a pair/type combination exists at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAssociation {
    pub source_id: String,
    pub target_id: String,
    pub association_type: AssociationType,
    pub strength: f64,
    pub activation_count: u64,
    pub last_activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryAssociation {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        association_type: AssociationType,
    ) -> Self {
        let (source_id, target_id) = canonical_pair(a.into(), b.into());
        Self {
            source_id,
            target_id,
            association_type,
            strength: 1.0,
            activation_count: 0,
            last_activated_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = clamp_strength(strength);
        self
    }

    /// The endpoint that is not `id`.
    pub fn other_end(&self, id: &str) -> &str {
        if self.source_id == id {
            &self.target_id
        } else {
            &self.source_id
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source_id == id || self.target_id == id
    }
}

pub(crate) fn canonical_pair(a: String, b: String) -> (String, String) {
    if a <= b { (a, b) } else { (b, a) }
}

pub(crate) fn clamp_strength(strength: f64) -> f64 {
    if strength.is_finite() {
        strength.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
