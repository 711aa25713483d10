use crate::error::MemoryError;
use crate::memory::consolidation::RetentionDecayMode;
use crate::memory::vector::FusionStrategy;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Embedding provider API key (falls back to `HIPPOCAMPUS_API_KEY`)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = UserDirs::new().map_or_else(
            || PathBuf::from("."),
            |u| u.home_dir().to_path_buf(),
        );
        let hippocampus_dir = home.join(".hippocampus");
        Self {
            config_path: hippocampus_dir.join("config.toml"),
            workspace_dir: hippocampus_dir.join("workspace"),
            api_key: None,
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedding provider: "none" | "openai" | "custom:URL"
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    /// Embedding model name (e.g. "text-embedding-3-small")
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embedding vector dimensions
    #[serde(default = "default_embedding_dims")]
    pub embedding_dimensions: usize,
    /// Upper bound for a single embedding call before falling back to lexical-only
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
    /// Max embedding cache entries before LRU eviction
    #[serde(default = "default_cache_size")]
    pub embedding_cache_size: usize,
    /// Weight for vector similarity in hybrid search (0.0–1.0)
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Weight for keyword BM25 in hybrid search (0.0–1.0)
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default)]
    pub fusion_strategy: FusionStrategy,
    /// Minimum cosine similarity for vector hits
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Vector search scans at most `limit * multiplier` candidates
    #[serde(default = "default_vector_candidate_multiplier")]
    pub vector_candidate_multiplier: usize,
    /// Raw BM25 scores are clamped into `[0, ceiling]` before normalization
    #[serde(default = "default_lexical_score_ceiling")]
    pub lexical_score_ceiling: f64,
    #[serde(default = "default_association_threshold")]
    pub association_threshold: f64,
    /// Max neighbours examined per association kind
    #[serde(default = "default_association_neighbor_limit")]
    pub association_neighbor_limit: usize,
    #[serde(default = "default_working_memory_capacity")]
    pub working_memory_capacity: usize,
    /// Default TTL for working-layer records; other layers never expire by default
    #[serde(default = "default_working_ttl_hours")]
    pub working_ttl_hours: Option<u32>,
    #[serde(default = "default_forget_delete_threshold")]
    pub forget_delete_threshold: f64,
    #[serde(default = "default_forget_consolidate_threshold")]
    pub forget_consolidate_threshold: f64,
    /// Multiplier applied to importance/retention when a record is weakened
    #[serde(default = "default_forget_weaken_factor")]
    pub forget_weaken_factor: f64,
    #[serde(default = "default_retention_delete_threshold")]
    pub retention_delete_threshold: f64,
    #[serde(default)]
    pub retention_decay_mode: RetentionDecayMode,
    /// Cap on non-keep actions per forgetting cycle
    #[serde(default)]
    pub max_forget_actions: Option<usize>,
}

fn default_embedding_provider() -> String {
    "none".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_embedding_timeout_ms() -> u64 {
    5_000
}
fn default_cache_size() -> usize {
    10_000
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_keyword_weight() -> f64 {
    0.4
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_vector_candidate_multiplier() -> usize {
    3
}
fn default_lexical_score_ceiling() -> f64 {
    10.0
}
fn default_association_threshold() -> f64 {
    0.7
}
fn default_association_neighbor_limit() -> usize {
    20
}
fn default_working_memory_capacity() -> usize {
    7
}
#[allow(clippy::unnecessary_wraps)]
fn default_working_ttl_hours() -> Option<u32> {
    Some(24)
}
fn default_forget_delete_threshold() -> f64 {
    0.8
}
fn default_forget_consolidate_threshold() -> f64 {
    0.6
}
fn default_forget_weaken_factor() -> f64 {
    0.8
}
fn default_retention_delete_threshold() -> f64 {
    0.1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dims(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
            embedding_cache_size: default_cache_size(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            fusion_strategy: FusionStrategy::default(),
            similarity_threshold: default_similarity_threshold(),
            vector_candidate_multiplier: default_vector_candidate_multiplier(),
            lexical_score_ceiling: default_lexical_score_ceiling(),
            association_threshold: default_association_threshold(),
            association_neighbor_limit: default_association_neighbor_limit(),
            working_memory_capacity: default_working_memory_capacity(),
            working_ttl_hours: default_working_ttl_hours(),
            forget_delete_threshold: default_forget_delete_threshold(),
            forget_consolidate_threshold: default_forget_consolidate_threshold(),
            forget_weaken_factor: default_forget_weaken_factor(),
            retention_delete_threshold: default_retention_delete_threshold(),
            retention_decay_mode: RetentionDecayMode::default(),
            max_forget_actions: None,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), MemoryError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemoryError::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), MemoryError> {
        unit_interval("vector_weight", self.vector_weight)?;
        unit_interval("keyword_weight", self.keyword_weight)?;
        if self.vector_weight + self.keyword_weight <= f64::EPSILON {
            return Err(MemoryError::Config(
                "vector_weight and keyword_weight cannot both be zero".into(),
            ));
        }
        unit_interval("similarity_threshold", self.similarity_threshold)?;
        unit_interval("association_threshold", self.association_threshold)?;
        unit_interval("forget_delete_threshold", self.forget_delete_threshold)?;
        unit_interval("forget_consolidate_threshold", self.forget_consolidate_threshold)?;
        unit_interval("forget_weaken_factor", self.forget_weaken_factor)?;
        unit_interval("retention_delete_threshold", self.retention_delete_threshold)?;
        if self.forget_consolidate_threshold > self.forget_delete_threshold {
            return Err(MemoryError::Config(
                "forget_consolidate_threshold cannot exceed forget_delete_threshold".into(),
            ));
        }
        if self.working_memory_capacity == 0 {
            return Err(MemoryError::Config(
                "working_memory_capacity must be at least 1".into(),
            ));
        }
        if self.vector_candidate_multiplier == 0 {
            return Err(MemoryError::Config(
                "vector_candidate_multiplier must be at least 1".into(),
            ));
        }
        if !(self.lexical_score_ceiling.is_finite() && self.lexical_score_ceiling > 0.0) {
            return Err(MemoryError::Config(
                "lexical_score_ceiling must be a positive number".into(),
            ));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn fusion_weights(&self) -> (f32, f32) {
        (self.vector_weight as f32, self.keyword_weight as f32)
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let hippocampus_dir = home.join(".hippocampus");
        let config_path = hippocampus_dir.join("config.toml");

        if !hippocampus_dir.exists() {
            fs::create_dir_all(&hippocampus_dir)
                .context("Failed to create .hippocampus directory")?;
            fs::create_dir_all(hippocampus_dir.join("workspace"))
                .context("Failed to create workspace directory")?;
        }

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config.workspace_dir = hippocampus_dir.join("workspace");
            config
        } else {
            let config = Self {
                config_path: config_path.clone(),
                workspace_dir: hippocampus_dir.join("workspace"),
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.memory.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(workspace) = std::env::var("HIPPOCAMPUS_WORKSPACE")
            && !workspace.is_empty()
        {
            self.workspace_dir = PathBuf::from(workspace);
        }

        if let Ok(key) = std::env::var("HIPPOCAMPUS_API_KEY")
            && !key.is_empty()
        {
            self.api_key = Some(key);
        }

        if let Ok(provider) = std::env::var("HIPPOCAMPUS_EMBEDDING_PROVIDER")
            && !provider.is_empty()
        {
            self.memory.embedding_provider = provider;
        }

        if let Ok(raw) = std::env::var("HIPPOCAMPUS_VECTOR_WEIGHT")
            && let Ok(weight) = raw.parse::<f64>()
            && (0.0..=1.0).contains(&weight)
        {
            self.memory.vector_weight = weight;
        }

        if let Ok(raw) = std::env::var("HIPPOCAMPUS_KEYWORD_WEIGHT")
            && let Ok(weight) = raw.parse::<f64>()
            && (0.0..=1.0).contains(&weight)
        {
            self.memory.keyword_weight = weight;
        }
    }
}
