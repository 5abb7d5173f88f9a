mod context_pack;
mod error;
mod fusion;
mod fuzzy;
mod query_pipeline;
mod rag_guard;
mod rerank;
pub mod hybrid;
pub mod profile;
pub use context_vector_store::SearchResult;
mod query_classifier;
mod query_expansion;
mod task_pack;

pub use context_pack::{ContextPackBudget, ContextPackItem, ContextPackOutput, CONTEXT_PACK_VERSION};
pub use error::{remediation, Result, SearchError};
pub use fusion::{AstBooster, RRFFusion};
pub use fuzzy::FuzzySearch;
pub use hybrid::HybridSearch;
pub use profile::{Bm25Config, MatchKind, RerankConfig, SearchProfile, Thresholds};
pub use query_classifier::{QueryClassifier, QueryType, QueryWeights};
pub use query_expansion::QueryExpander;
pub use query_pipeline::{PreSearchHook, QueryPipeline, SearchOptions};
pub use rag_guard::{DefaultLowSignalPredicate, LowSignalPredicate, RagGuard};
pub use rerank::Reranker;
pub use task_pack::{NextAction, NextActionKind, TaskPackItem, TaskPackOutput, TASK_PACK_VERSION};
