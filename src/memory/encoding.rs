//! Self-referential encoding: score incoming content and pick its layer.

use crate::memory::types::{MemoryLayer, NewMemory, SelfMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stems matched against the start of each word; each counts once.
const EMOTIONAL_STEMS: &[&str] = &[
    "critical",
    "urgent",
    "success",
    "fail",
    "error",
    "important",
    "breakthrough",
    "danger",
    "excit",
    "frustrat",
    "love",
    "hate",
    "fear",
    "panic",
];

const FIRST_PERSON: &[&str] = &["i", "me", "my", "mine", "myself", "we", "us", "our"];

const EMOTIONAL_SATURATION: f64 = 3.0;
const SELF_RELEVANCE_SATURATION: f64 = 2.0;

/// Caller-supplied hints for [`self_referential_encode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingContext {
    /// The caller expects to need this again.
    pub expected_future_use: bool,
    pub tags: Vec<String>,
}

impl EncodingContext {
    #[must_use]
    pub fn expecting_reuse(mut self) -> Self {
        self.expected_future_use = true;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodingFeatures {
    pub emotional_intensity: f64,
    pub self_relevance: f64,
    pub uniqueness: f64,
    pub transferability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingDecision {
    pub layer: MemoryLayer,
    pub consolidated: bool,
    pub importance: f64,
    pub emotional_weight: f64,
    pub features: EncodingFeatures,
    pub metadata: SelfMetadata,
}

impl EncodingDecision {
    /// Turn the decision into an insert for `content`.
    pub fn into_new_memory(self, content: impl Into<String>, tags: &[String]) -> NewMemory {
        NewMemory::new(content, self.layer)
            .with_importance(self.importance)
            .with_emotional_weight(self.emotional_weight)
            .with_consolidated(self.consolidated)
            .with_self_metadata(self.metadata)
            .with_tags(tags.iter().cloned())
    }
}

fn tokens(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[allow(clippy::cast_precision_loss)]
pub fn extract_features(content: &str, declared: MemoryLayer) -> EncodingFeatures {
    let words = tokens(content);
    let emotional_hits = EMOTIONAL_STEMS
        .iter()
        .filter(|stem| words.iter().any(|w| w.starts_with(*stem)))
        .count();
    let pronoun_hits = words
        .iter()
        .filter(|w| FIRST_PERSON.contains(&w.as_str()))
        .count();

    let uniqueness = if words.is_empty() {
        0.0
    } else {
        let distinct: HashSet<&str> = words.iter().map(String::as_str).collect();
        (2.0 * distinct.len() as f64 / words.len() as f64).min(1.0)
    };

    EncodingFeatures {
        emotional_intensity: (emotional_hits as f64 / EMOTIONAL_SATURATION).min(1.0),
        self_relevance: (pronoun_hits as f64 / SELF_RELEVANCE_SATURATION).min(1.0),
        uniqueness,
        transferability: transferability(declared),
    }
}

pub fn transferability(declared: MemoryLayer) -> f64 {
    match declared {
        MemoryLayer::Procedural => 0.8,
        MemoryLayer::Semantic => 0.7,
        MemoryLayer::Reflective => 0.6,
        MemoryLayer::Working | MemoryLayer::Episodic => 0.4,
    }
}

pub fn importance(features: &EncodingFeatures, expected_future_use: bool) -> f64 {
    let reuse = if expected_future_use { 0.1 } else { 0.0 };
    (0.5 + 0.25 * features.emotional_intensity
        + 0.2 * features.self_relevance
        + 0.15 * features.uniqueness
        + 0.1 * features.transferability
        + reuse)
        .clamp(0.0, 1.0)
}

/// Ordered rules, first match wins. The consolidated flag is decided
/// independently of the layer.
pub fn classify(features: &EncodingFeatures, declared: MemoryLayer) -> (MemoryLayer, bool) {
    let ei = features.emotional_intensity;
    let layer = if ei > 0.7 && features.self_relevance > 0.6 {
        MemoryLayer::Working
    } else if declared == MemoryLayer::Reflective {
        MemoryLayer::Reflective
    } else if declared == MemoryLayer::Procedural {
        MemoryLayer::Procedural
    } else if features.transferability > 0.6 && ei < 0.3 {
        MemoryLayer::Semantic
    } else {
        // Declared episodic and the fallback land in the same place.
        MemoryLayer::Episodic
    };
    let consolidated = features.uniqueness > 0.7 && ei > 0.5;
    (layer, consolidated)
}

pub fn self_referential_encode(
    content: &str,
    declared: MemoryLayer,
    context: &EncodingContext,
) -> EncodingDecision {
    let features = extract_features(content, declared);
    let (layer, consolidated) = classify(&features, declared);
    let importance = importance(&features, context.expected_future_use);

    EncodingDecision {
        layer,
        consolidated,
        importance,
        emotional_weight: 1.0 + 0.5 * features.emotional_intensity,
        metadata: SelfMetadata {
            self_assessed_importance: importance,
            emotional_marker: features.emotional_intensity,
            self_relevance: features.self_relevance,
            expected_frequency: if context.expected_future_use { 0.7 } else { 0.3 },
            uniqueness: features.uniqueness,
            transferability: features.transferability,
        },
        features,
    }
}
