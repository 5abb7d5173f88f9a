use std::collections::HashMap;

use context_code_chunker::CodeChunk;
use serde::{Deserialize, Serialize};

/// Per-source-file bookkeeping record, stored in the `HashStore` manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub mtime: f64,
    pub content_hash: String,
    pub indexed_version: String,
}

/// Aggregate index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub languages: HashMap<String, usize>,
    pub file_types: HashMap<String, usize>,
    pub index_size_mb: f64,
    pub last_updated: String,
    pub embedding_model: String,
}

impl IndexStats {
    pub fn add_file(&mut self, language: &str, extension: &str) {
        self.total_files += 1;
        *self.languages.entry(language.to_string()).or_insert(0) += 1;
        *self.file_types.entry(extension.to_string()).or_insert(0) += 1;
    }

    pub fn add_chunks(&mut self, count: usize) {
        self.total_chunks += count;
    }
}

/// A query hit: the matched `CodeChunk` plus scoring/navigation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: CodeChunk,
    pub similarity_score: f32,
    pub rank: usize,
    pub navigation_hint: String,
    pub symbol_context: Option<String>,
    pub preview_text: Option<String>,
    pub surrounding_lines: Option<SurroundingLines>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurroundingLines {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl SearchResult {
    #[must_use]
    pub fn from_chunk(chunk: CodeChunk, similarity_score: f32, rank: usize) -> Self {
        let navigation_hint = chunk.navigation_hint();
        let symbol_context = chunk.metadata.symbol_name.clone();
        Self {
            chunk,
            similarity_score,
            rank,
            navigation_hint,
            symbol_context,
            preview_text: None,
            surrounding_lines: None,
        }
    }
}
