use context_indexer::ToolMeta;
use context_vector_store::SearchResult;
use serde::{Deserialize, Serialize};

pub const CONTEXT_PACK_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextPackOutput {
    pub version: u32,
    pub query: String,
    pub model_id: String,
    pub profile: String,
    pub items: Vec<ContextPackItem>,
    pub budget: ContextPackBudget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ToolMeta>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextPackItem {
    pub id: String,
    pub role: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    pub score: f32,
    pub imports: Vec<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextPackBudget {
    pub max_chars: usize,
    pub used_chars: usize,
    pub truncated: bool,
    pub dropped_items: usize,
}

impl ContextPackOutput {
    /// Flattens ranked `SearchResult`s into an agent-ready pack, stopping
    /// once `max_chars` of item content would be exceeded. Items are kept
    /// in rank order, so truncation always drops the lowest-ranked tail
    /// rather than an arbitrary subset.
    #[must_use]
    pub fn from_results(
        query: &str,
        model_id: &str,
        profile: &str,
        results: &[SearchResult],
        max_chars: usize,
    ) -> Self {
        let mut items = Vec::with_capacity(results.len());
        let mut used_chars = 0usize;
        let mut dropped_items = 0usize;

        for result in results {
            let content_len = result.chunk.content.len();
            if used_chars + content_len > max_chars && !items.is_empty() {
                dropped_items += 1;
                continue;
            }
            used_chars += content_len;
            items.push(ContextPackItem {
                id: result.chunk.chunk_id.clone(),
                role: "context".to_string(),
                file: result.chunk.file_path.clone(),
                start_line: result.chunk.start_line,
                end_line: result.chunk.end_line,
                symbol: result.chunk.metadata.symbol_name.clone(),
                chunk_type: Some(format!("{:?}", result.chunk.metadata.chunk_type).to_lowercase()),
                score: result.similarity_score,
                imports: result.chunk.metadata.context_imports.clone(),
                content: result.chunk.content.clone(),
                relationship: None,
                distance: None,
            });
        }

        Self {
            version: CONTEXT_PACK_VERSION,
            query: query.to_string(),
            model_id: model_id.to_string(),
            profile: profile.to_string(),
            items,
            budget: ContextPackBudget {
                max_chars,
                used_chars,
                truncated: dropped_items > 0,
                dropped_items,
            },
            meta: None,
        }
    }
}
