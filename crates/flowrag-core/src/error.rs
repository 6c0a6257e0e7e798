use thiserror::Error;

/// Failure of an external collaborator (embedding provider or vector store).
///
/// The retriever never propagates these: each one degrades the affected
/// collection or stage to an empty result set and is logged.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("collection not found: {0}")]
    MissingCollection(String),

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
