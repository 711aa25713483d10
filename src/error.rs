use thiserror::Error;

// ─── Memory errors ──────────────────────────────────────────────────────────

/// Typed failures raised by the memory store.
///
/// Internal code uses `anyhow::Result` for context chains. Failures a caller
/// must tell apart are raised as a `MemoryError` inside the `anyhow::Error`,
/// so callers can `downcast_ref::<MemoryError>()` to pick a recovery path.
///
/// Embedding-provider outages never show up here: they downgrade retrieval to
/// lexical-only and are logged instead.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Store(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("config: {0}")]
    Config(String),

    #[error("sweep already running")]
    SweepInProgress,
}

impl MemoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Returns the typed memory error carried by `err`, if any.
pub fn memory_error(err: &anyhow::Error) -> Option<&MemoryError> {
    err.downcast_ref::<MemoryError>()
}
