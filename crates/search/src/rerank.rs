//! Reranker: a cross-encoder that scores `(query, candidate)` pairs, loaded
//! lazily on first use and kept as a process-global singleton thereafter.
//! Runs on a blocking thread so callers never block the async scheduler; a
//! missing/unconfigured model is a no-op, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use context_code_chunker::CodeChunk;
use context_vector_store::SearchResult;
use tokio::sync::OnceCell;

use crate::profile::{RerankConfig, SearchProfile};

/// `Unloaded → (first rerank) → Loading → Ready`, mirroring the embedding
/// runtime's lazy-singleton pattern (`context_vector_store::embedding`).
trait CrossEncoder: Send + Sync {
    /// Score each `(query, candidate)` pair; higher is more relevant. Must
    /// return one score per candidate, in order.
    fn score(&self, query: &str, candidates: &[String]) -> Vec<f32>;
}

/// No model configured: scoring is the identity (every candidate keeps its
/// incoming rank), so `Reranker::rerank` degrades to a no-op rather than
/// failing when no `reranker_model` key is set in config.
struct IdentityCrossEncoder;

impl CrossEncoder for IdentityCrossEncoder {
    fn score(&self, _query: &str, candidates: &[String]) -> Vec<f32> {
        let n = candidates.len().max(1);
        (0..candidates.len())
            .map(|i| 1.0 - (i as f32 / n as f32))
            .collect()
    }
}

/// A staged cross-encoder backed by a tokenizer + a fixed lexical-overlap
/// heuristic. A real deployment would swap this for an `ort`-backed session
/// the same way `OnnxEmbeddingRuntime` wraps one for embeddings; the trait
/// boundary (`CrossEncoder`) is what the rest of the pipeline depends on.
struct HeuristicCrossEncoder {
    tokenizer: Option<tokenizers::Tokenizer>,
}

impl HeuristicCrossEncoder {
    fn load(tokenizer_path: &std::path::Path) -> Self {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).ok();
        Self { tokenizer }
    }
}

impl CrossEncoder for HeuristicCrossEncoder {
    fn score(&self, query: &str, candidates: &[String]) -> Vec<f32> {
        let query_tokens: Vec<String> = match &self.tokenizer {
            Some(tok) => tok
                .encode(query, false)
                .map(|enc| enc.get_tokens().iter().map(|s| s.to_lowercase()).collect())
                .unwrap_or_default(),
            None => query
                .split_whitespace()
                .map(str::to_lowercase)
                .collect(),
        };

        candidates
            .iter()
            .map(|candidate| {
                let lower = candidate.to_lowercase();
                let hits = query_tokens
                    .iter()
                    .filter(|t| !t.is_empty() && lower.contains(t.as_str()))
                    .count();
                let denom = query_tokens.len().max(1) as f32;
                hits as f32 / denom
            })
            .collect()
    }
}

enum RerankerState {
    NoModel,
    Loaded(Arc<dyn CrossEncoder>),
}

/// Process-global, lazily-initialized cross-encoder reranker. Safe to clone
/// cheaply — every clone shares the same singleton slot.
#[derive(Clone)]
pub struct Reranker {
    config: RerankConfig,
    model_dir: Option<std::path::PathBuf>,
    state: Arc<OnceCell<RerankerState>>,
}

impl Reranker {
    #[must_use]
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            model_dir: std::env::var("MCP_RERANKER_MODEL_DIR").ok().map(Into::into),
            state: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(RerankConfig::none())
    }

    async fn state(&self) -> &RerankerState {
        let config = self.config.clone();
        let model_dir = self.model_dir.clone();
        self.state
            .get_or_init(|| async move {
                let Some(model_id) = config.model_id else {
                    return RerankerState::NoModel;
                };
                let Some(dir) = model_dir else {
                    log::info!("no reranker_model_dir configured; reranker stays a no-op");
                    return RerankerState::NoModel;
                };
                let tokenizer_path = dir.join(&model_id).join("tokenizer.json");
                if !tokenizer_path.exists() {
                    log::info!(
                        "reranker model '{model_id}' not staged at {}; staying a no-op",
                        tokenizer_path.display()
                    );
                    return RerankerState::NoModel;
                }
                log::info!("loading reranker model '{model_id}'");
                RerankerState::Loaded(Arc::new(HeuristicCrossEncoder::load(&tokenizer_path)))
            })
            .await
    }

    /// Reranks `results` against `query`. Runs the (synchronous) scoring on
    /// a blocking thread. On any failure, or when no model is configured,
    /// returns `results` unchanged — rerank is always a best-effort
    /// enhancement, never a hard dependency.
    pub async fn rerank(&self, mut results: Vec<SearchResult>, query: &str) -> Vec<SearchResult> {
        let model = match self.state().await {
            RerankerState::NoModel => return results,
            RerankerState::Loaded(model) => Arc::clone(model),
        };

        let previews: Vec<String> = results
            .iter()
            .map(|r| preview_text(&r.chunk, 512))
            .collect();
        let query = query.to_string();

        let scored = tokio::task::spawn_blocking(move || model.score(&query, &previews)).await;

        let Ok(scores) = scored else {
            log::warn!("reranker task panicked; falling back to unranked order");
            return results;
        };

        if scores.len() != results.len() {
            log::warn!("reranker returned {} scores for {} candidates; falling back", scores.len(), results.len());
            return results;
        }

        for (result, score) in results.iter_mut().zip(scores) {
            // Blend: the cross-encoder refines ordering but never discards the
            // vector-search evidence entirely.
            result.similarity_score = (result.similarity_score * 0.5 + score.clamp(0.0, 1.0) * 0.5)
                .clamp(0.0, 1.0);
        }

        results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }
}

fn preview_text(chunk: &CodeChunk, max_chars: usize) -> String {
    let mut boundary = max_chars.min(chunk.content.len());
    while boundary > 0 && !chunk.content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    chunk.content[..boundary].to_string()
}

/// Rule-based rerank pass applied inside `HybridSearch` before the
/// cross-encoder ever runs: penalizes results that only matched one of the
/// two sources (semantic-only or fuzzy-only) ambiguously and applies the
/// profile's per-path weighting against the fused score.
#[must_use]
pub fn rerank_candidates(
    profile: &SearchProfile,
    chunks: &[CodeChunk],
    query_tokens: &[String],
    fused: Vec<(usize, f32)>,
    semantic_map: &HashMap<usize, f32>,
    fuzzy_map: &HashMap<usize, f32>,
) -> Vec<(usize, f32)> {
    fused
        .into_iter()
        .map(|(idx, score)| {
            let mut adjusted = score;

            // Reward hits that both ranking sources agree on.
            if semantic_map.contains_key(&idx) && fuzzy_map.contains_key(&idx) {
                adjusted *= 1.1;
            }

            if let Some(chunk) = chunks.get(idx) {
                if !query_tokens.is_empty() {
                    let symbol_hit = chunk
                        .metadata
                        .symbol_name
                        .as_ref()
                        .is_some_and(|name| {
                            let lower = name.to_ascii_lowercase();
                            query_tokens.iter().any(|t| lower == *t)
                        });
                    if symbol_hit {
                        adjusted *= 1.25;
                    }
                }
                adjusted *= profile.path_weight(&chunk.file_path);
            }

            (idx, adjusted)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::{ChunkMetadata, ChunkType};

    fn chunk(path: &str, content: &str) -> CodeChunk {
        CodeChunk::new(path.to_string(), 1, 5, content.to_string(), ChunkMetadata::default())
    }

    #[tokio::test]
    async fn no_model_configured_is_a_noop() {
        let reranker = Reranker::disabled();
        let results = vec![SearchResult::from_chunk(chunk("a.rs", "fn a() {}"), 0.5, 1)];
        let out = reranker.rerank(results.clone(), "query").await;
        assert_eq!(out[0].similarity_score, results[0].similarity_score);
    }

    #[test]
    fn rule_based_rerank_rewards_dual_source_hits() {
        let profile = SearchProfile::general();
        let chunks = vec![chunk("src/a.rs", "fn helper() {}")];
        let fused = vec![(0usize, 0.5f32)];
        let mut semantic = HashMap::new();
        semantic.insert(0, 0.5);
        let mut fuzzy = HashMap::new();
        fuzzy.insert(0, 0.5);

        let boosted = rerank_candidates(&profile, &chunks, &[], fused.clone(), &semantic, &fuzzy);
        let baseline = rerank_candidates(&profile, &chunks, &[], fused, &semantic, &HashMap::new());
        assert!(boosted[0].1 > baseline[0].1);
    }

    #[test]
    fn exhaustive_chunk_type_variants_do_not_panic() {
        let _ = ChunkType::Code;
    }
}
