use thiserror::Error;

/// Infrastructure failures surfaced by the transition engine.
///
/// Domain-level rejections are not errors: a transition attempt that matches
/// no rule or fails a guard returns an [`Outcome`](crate::engine::Outcome)
/// value instead. Only conditions that abort the attempt before any mutation
/// land here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No record exists for the entity id. Fatal to the single call,
    /// not to the process.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The store failed to load or persist the record. Retryable by the
    /// caller; the attempt left no partial state behind.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by [`EntityStore`](crate::store::EntityStore) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}
