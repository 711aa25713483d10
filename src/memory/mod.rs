pub mod associations;
pub mod consolidation;
pub mod embeddings;
pub mod encoding;
pub mod factory;
pub mod forgetting;
pub mod hygiene;
pub mod linking;
pub mod sqlite;
pub mod system;
pub mod traits;
pub mod types;
pub mod vector;
pub mod working;

pub use associations::{AssociationType, MemoryAssociation};
pub use consolidation::{RetentionDecayMode, RetentionPolicy, RetentionReport};
pub use embeddings::{EmbeddingProvider, NoopEmbedding, OpenAiEmbedding};
pub use encoding::{EncodingContext, EncodingDecision, EncodingFeatures};
pub use factory::create_memory;
pub use forgetting::{ForgettingCandidate, ForgettingPolicy, ForgettingReport};
pub use hygiene::{SweepGate, SweepReport};
pub use linking::LinkReport;
pub use sqlite::SqliteMemory;
pub use system::{Activation, MemorySystem, Remembered};
pub use traits::Memory;
pub use types::{
    ForgetAction, HybridHit, MemoryEvent, MemoryEventType, MemoryLayer, MemoryRecord,
    MemoryStats, NewMemory, RecordUpdate, RetentionUpdate, SearchHit, SearchOptions,
    SelfMetadata,
};
pub use vector::FusionStrategy;
pub use working::WorkingMemory;
