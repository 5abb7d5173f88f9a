use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

/// Error taxonomy for the query pipeline. `RustPanicError`, `SearchError`
/// (corruption) and `ServiceUnavailableError` mirror the resilience layer's
/// `CoreError` one-to-one — a caller matching on this enum never needs to
/// reach into `context_vector_store::resilience` directly.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("vector store error: {0}")]
    Store(#[from] context_vector_store::VectorStoreError),

    #[error("native runtime panic: {0} — reindexing is recommended")]
    RustPanicError(String),

    #[error("search error: {0} — reindex required")]
    Corruption(String),

    #[error("service unavailable: circuit breaker is open, try again later")]
    ServiceUnavailableError,

    #[error("transient io error: {0}")]
    TransientIoError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<context_vector_store::CoreError> for SearchError {
    fn from(err: context_vector_store::CoreError) -> Self {
        use context_vector_store::CoreError;
        match err {
            CoreError::RustPanicError(msg) => Self::RustPanicError(msg),
            CoreError::SearchError(msg) => Self::Corruption(msg),
            CoreError::ServiceUnavailableError => Self::ServiceUnavailableError,
            CoreError::TransientIoError(msg) => Self::TransientIoError(msg),
            CoreError::TimeoutError(d) => Self::TransientIoError(format!("timed out after {d:?}")),
            CoreError::ProjectNotFound(msg) => Self::Other(msg),
            CoreError::ParsingError { path, message } => {
                Self::Other(format!("failed to parse {path}: {message}"))
            }
        }
    }
}

/// Generates user-facing remediation text for a query error by deriving a
/// hint directly from the error's own type, rather than pattern-matching a
/// collaborator's error string.
#[must_use]
pub fn remediation(err: &SearchError) -> Option<&'static str> {
    match err {
        SearchError::RustPanicError(_) | SearchError::Corruption(_) => {
            Some("reindex the project: the on-disk index may be stale or corrupted")
        }
        SearchError::ServiceUnavailableError => {
            Some("the store is temporarily unavailable; retry shortly")
        }
        _ => None,
    }
}
