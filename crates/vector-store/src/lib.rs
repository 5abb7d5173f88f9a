//! # Context Vector Store
//!
//! Storage, embedding, and resilience primitives for the semantic index:
//! the `VectorStore` capability contract and its JSON-backed reference
//! implementation, the `EmbeddingRuntime` abstraction (plus the CPU
//! thread-budget guard the indexer wraps every batch embed call in), the
//! embedding-template renderer, and the retry/circuit-breaker machinery
//! other crates run store calls through.

mod chunk_corpus;
mod data;
mod embedding;
mod error;
mod resilience;
mod store;
mod templates;

pub use chunk_corpus::{corpus_path_for_project_root, ChunkCorpus};
pub use data::{FileMetadata, IndexStats, SearchResult, SurroundingLines};
pub use embedding::{
    current_model_id, dimensions_for_model, runtime_for_model, EmbeddingRuntime,
    HashEmbeddingRuntime, OnnxEmbeddingRuntime, ThreadBudgetGuard,
};
pub use error::{Result, VectorStoreError};
pub use resilience::{classify, CircuitBreaker, CoreError, ErrorClass, ResilienceManager};
pub use store::{JsonVectorStore, SearchFilters, VectorStore};
pub use templates::{
    classify_document_kind, DocumentKind, DocumentTemplates, EmbeddingTemplates,
    GraphNodeTemplates, QueryKind, QueryTemplates, EMBEDDING_TEMPLATES_SCHEMA_VERSION,
};
