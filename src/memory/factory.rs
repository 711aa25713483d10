use crate::config::MemoryConfig;

use super::{SqliteMemory, embeddings};

use std::path::Path;
use std::sync::Arc;

/// Open the store under `workspace_dir` with the configured embedding provider.
pub async fn create_memory(
    config: &MemoryConfig,
    workspace_dir: &Path,
    api_key: Option<&str>,
) -> anyhow::Result<SqliteMemory> {
    let embedder: Arc<dyn embeddings::EmbeddingProvider> =
        Arc::from(embeddings::create_embedding_provider(
            &config.embedding_provider,
            api_key,
            &config.embedding_model,
            config.embedding_dimensions,
        ));

    SqliteMemory::with_embedder(workspace_dir, embedder, config.clone()).await
}
