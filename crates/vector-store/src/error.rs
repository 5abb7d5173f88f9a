use thiserror::Error;

/// Errors raised by the `VectorStore` trait and its reference implementation.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("store not found at {0}")]
    NotFound(String),

    #[error("store corrupted: {0} (reindex required)")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;
