//! Source-to-chunk extraction: turns a file's text into a hierarchy of
//! `CodeChunk`s with structural context (parent class/module, nesting,
//! imports) attached, ready for embedding.
//!
//! ```no_run
//! use context_code_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::for_embeddings());
//! let chunks = chunker.chunk_str("def f(x):\n    return x\n", Some("a.py")).unwrap();
//! assert!(!chunks.is_empty());
//! ```

mod chunk;
mod chunker;
mod contextual_imports;
mod error;
mod language;
mod metrics;

pub use chunk::{compute_chunk_id, hash_content, ChunkMetadata, ChunkType, CodeChunk};
pub use chunker::{Chunker, ChunkerConfig};
pub use contextual_imports::{extract_identifiers_from_import, extract_imports_from_lines, filter_relevant_imports};
pub use error::{ChunkerError, Result};
pub use language::{Language, LanguageSizeLimits};
pub use metrics::{compute_metrics, MetricsRecord};
