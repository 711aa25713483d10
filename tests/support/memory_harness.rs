#![allow(dead_code, clippy::cast_precision_loss)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use hippocampus::MemoryConfig;
use hippocampus::memory::embeddings::{EmbeddingProvider, NoopEmbedding};
use hippocampus::memory::{HybridHit, MemorySystem, SearchHit, SqliteMemory};

pub const CONCEPT_DIMS: usize = 4;

/// Word groups mapped onto fixed axes; any other word lands on the last axis.
const CONCEPTS: [&[&str]; 3] = [
    &["apple", "apples", "orchard", "pears", "pear", "fruit", "harvest"],
    &["database", "sqlite", "index", "query", "schema"],
    &["weather", "rain", "storm", "forecast"],
];

/// Bag-of-concepts embedder: texts about the same topic point the same way
/// even when they share no literal word.
pub struct ConceptEmbedding;

impl ConceptEmbedding {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; CONCEPT_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let axis = CONCEPTS
                .iter()
                .position(|group| group.contains(&word.as_str()))
                .unwrap_or(CONCEPT_DIMS - 1);
            v[axis] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for ConceptEmbedding {
    fn name(&self) -> &str {
        "concept"
    }

    fn model(&self) -> &str {
        "concept-v1"
    }

    fn dimensions(&self) -> usize {
        CONCEPT_DIMS
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        Ok(texts.iter().map(|t| Some(Self::vector(t))).collect())
    }
}

/// Reports itself available but every call fails.
pub struct FailingEmbedding;

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    fn name(&self) -> &str {
        "failing"
    }

    fn model(&self) -> &str {
        "concept-v1"
    }

    fn dimensions(&self) -> usize {
        CONCEPT_DIMS
    }

    async fn embed(&self, _texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        anyhow::bail!("embedding endpoint unreachable")
    }
}

/// Never answers within any sane timeout.
pub struct StalledEmbedding;

#[async_trait]
impl EmbeddingProvider for StalledEmbedding {
    fn name(&self) -> &str {
        "stalled"
    }

    fn model(&self) -> &str {
        "concept-v1"
    }

    fn dimensions(&self) -> usize {
        CONCEPT_DIMS
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(texts.iter().map(|t| Some(ConceptEmbedding::vector(t))).collect())
    }
}

pub fn fast_timeout_config() -> MemoryConfig {
    MemoryConfig {
        embedding_timeout_ms: 100,
        ..MemoryConfig::default()
    }
}

pub async fn sqlite_with(
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryConfig,
) -> (TempDir, SqliteMemory) {
    let temp_dir = TempDir::new().expect("temp directory should be created");
    let memory = SqliteMemory::with_embedder(temp_dir.path(), embedder, config)
        .await
        .expect("sqlite memory should initialize");
    (temp_dir, memory)
}

/// Lexical-only store.
pub async fn sqlite_fixture() -> (TempDir, SqliteMemory) {
    sqlite_with(Arc::new(NoopEmbedding), MemoryConfig::default()).await
}

pub async fn concept_fixture() -> (TempDir, SqliteMemory) {
    sqlite_with(Arc::new(ConceptEmbedding), MemoryConfig::default()).await
}

pub async fn system_fixture() -> (TempDir, Arc<SqliteMemory>, MemorySystem) {
    let (tmp, store) = sqlite_fixture().await;
    let store = Arc::new(store);
    let system = MemorySystem::new(store.clone(), MemoryConfig::default());
    (tmp, store, system)
}

pub fn hit_ids(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().map(|h| h.record.id.clone()).collect()
}

pub fn hybrid_ids(hits: &[HybridHit]) -> Vec<String> {
    hits.iter().map(|h| h.record.id.clone()).collect()
}
