//! QueryPipeline: `query → retrieve (via the resilience layer) → enrich →
//! rerank → boost/diversify`, the orchestrator every `search_code`-style
//! tool call in the RPC layer (out of scope here) sits on top of.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use context_vector_store::{CoreError, ResilienceManager, SearchFilters, SearchResult, SurroundingLines, VectorStore};

use crate::context_pack::ContextPackOutput;
use crate::error::{Result, SearchError};
use crate::profile::Thresholds;
use crate::query_expansion::QueryExpander;
use crate::rag_guard::RagGuard;
use crate::rerank::Reranker;
use crate::task_pack::TaskPackOutput;

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CONTEXT_LINES: usize = 3;
const DEFAULT_DIVERSITY_CAP: usize = 3;
const RECENCY_BOOST: f32 = 0.05;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_JITTER: f64 = 0.2;

/// Pre-search hook ("AutoIndexer"): invoked best-effort before retrieval
/// runs. A failure is logged, never raised — the query proceeds against
/// whatever index state currently exists.
#[async_trait]
pub trait PreSearchHook: Send + Sync {
    async fn before_search(&self, query: &str) -> anyhow::Result<()>;
}

/// `QueryPipeline::search`'s full parameter set; `filters` and
/// `similarity_threshold` are both optional:
/// `search(query, limit=10, filters?, similarity_threshold?)`.
#[derive(Default)]
pub struct SearchOptions {
    pub filters: Option<SearchFilters>,
    pub similarity_threshold: Option<f32>,
    pub include_context: bool,
}

/// The orchestrator. Holds no project-specific state beyond what's
/// passed at construction — one instance per project/model pairing.
pub struct QueryPipeline {
    store: Arc<dyn VectorStore>,
    resilience: ResilienceManager,
    reranker: Reranker,
    rag_guard: Arc<RagGuard>,
    expander: QueryExpander,
    thresholds: Thresholds,
    project_root: Option<PathBuf>,
    pre_search_hook: Option<Arc<dyn PreSearchHook>>,
    last_health_check: Mutex<Option<Instant>>,
    health_check_interval: Duration,
    context_lines: usize,
    diversity_cap: usize,
    max_retries: u32,
    jitter: f64,
}

impl QueryPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            resilience: ResilienceManager::default(),
            reranker: Reranker::disabled(),
            rag_guard: Arc::new(RagGuard::default_policy()),
            expander: QueryExpander::new(),
            thresholds: Thresholds::default(),
            project_root: None,
            pre_search_hook: None,
            last_health_check: Mutex::new(None),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            context_lines: DEFAULT_CONTEXT_LINES,
            diversity_cap: DEFAULT_DIVERSITY_CAP,
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: DEFAULT_JITTER,
        }
    }

    #[must_use]
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    #[must_use]
    pub fn with_rag_guard(mut self, rag_guard: Arc<RagGuard>) -> Self {
        self.rag_guard = rag_guard;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_pre_search_hook(mut self, hook: Arc<dyn PreSearchHook>) -> Self {
        self.pre_search_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceManager) -> Self {
        self.resilience = resilience;
        self
    }

    #[must_use]
    pub fn rag_guard(&self) -> &Arc<RagGuard> {
        &self.rag_guard
    }

    /// Query → throttled health check → pre-search hook → adaptive
    /// threshold → active-files refresh → query expansion → resilient
    /// retrieval → context enrichment → staleness check → rerank →
    /// recency boost → guard penalties/scope filter → diversity cap →
    /// final sort.
    pub async fn search(&self, query: &str, limit: usize, options: SearchOptions) -> Result<Vec<SearchResult>> {
        // 1. Reject empty query.
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // 2. Throttled health_check(), at most once per `health_check_interval`.
        self.throttled_health_check().await;

        // 3. Pre-search hook: best-effort, never raised.
        if let Some(hook) = &self.pre_search_hook {
            if let Err(err) = hook.before_search(query).await {
                log::warn!("pre-search hook failed: {err}");
            }
        }

        // 4. Adaptive threshold when the caller omits one.
        let threshold = options
            .similarity_threshold
            .unwrap_or_else(|| self.thresholds.adaptive(query));

        // 5. Update RagGuard active files from git status (best effort).
        let changed = match &self.project_root {
            Some(root) => context_indexer::changed_files(root).await,
            None => None,
        };
        if let Some(changed) = &changed {
            self.rag_guard.set_active_files(changed.clone());
        }

        // 6. QueryProcessor.process: normalize + synonym expansion.
        let processed = self.expander.expand_to_query(query);

        // 7. Resilient retrieval.
        let store = Arc::clone(&self.store);
        let filters = options.filters.clone();
        let raw: Vec<SearchResult> = self
            .resilience
            .execute(
                || {
                    let store = Arc::clone(&store);
                    let processed = processed.clone();
                    let filters = filters.clone();
                    async move { store.search(&processed, limit, filters.as_ref(), threshold).await }
                },
                self.max_retries,
                self.jitter,
            )
            .await
            .map_err(|e| match e {
                CoreError::ServiceUnavailableError => {
                    log::warn!("circuit breaker open; returning empty result set");
                    SearchError::ServiceUnavailableError
                }
                other => other.into(),
            })?;

        // 8. Context enrichment.
        let mut enriched = Vec::with_capacity(raw.len());
        for result in raw {
            enriched.push(self.enrich_context(result, options.include_context).await);
        }

        // 9. Stale-index check (best-effort; logs, never drops the result).
        self.check_stale(&enriched).await;

        // 10. Rerank; Reranker itself falls back to unchanged order on failure.
        let reranked = self.reranker.rerank(enriched, query).await;

        // 11. Recency boost.
        let boosted = self.apply_recency_boost(reranked, changed.as_ref());

        // 12. RagGuard penalties and scope filter.
        let guarded = self.rag_guard.apply_penalties(boosted);
        let scoped = self.rag_guard.scope_filter(query, guarded);

        // 13. Diversity cap: at most `diversity_cap` results per file.
        let diversified = self.apply_diversity_cap(scoped);

        // 14. Final sort by score desc; assign rank.
        let mut final_results = diversified;
        final_results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, result) in final_results.iter_mut().enumerate() {
            result.rank = i + 1;
        }

        self.log_efficiency(query, &final_results);

        Ok(final_results)
    }

    /// Runs [`search`](Self::search) and flattens the results into an
    /// agent-ready [`ContextPackOutput`], stopping once `max_chars` of
    /// content would be exceeded.
    pub async fn search_as_context_pack(
        &self,
        query: &str,
        limit: usize,
        options: SearchOptions,
        model_id: &str,
        profile: &str,
        max_chars: usize,
    ) -> Result<ContextPackOutput> {
        let results = self.search(query, limit, options).await?;
        Ok(ContextPackOutput::from_results(query, model_id, profile, &results, max_chars))
    }

    /// Same as [`search_as_context_pack`](Self::search_as_context_pack),
    /// wrapped in a [`TaskPackOutput`] envelope with a per-item
    /// `open_file` next action — the shape a tool call that wants "what
    /// should I look at next" rather than a bare ranked list would ask for.
    pub async fn search_as_task_pack(
        &self,
        intent: &str,
        query: &str,
        limit: usize,
        options: SearchOptions,
        model_id: &str,
        profile: &str,
        max_chars: usize,
    ) -> Result<TaskPackOutput> {
        let pack = self
            .search_as_context_pack(query, limit, options, model_id, profile, max_chars)
            .await?;
        Ok(TaskPackOutput::from_context_pack(intent, pack))
    }

    async fn throttled_health_check(&self) {
        let should_check = {
            let mut last = self.last_health_check.lock().unwrap();
            let due = last.is_none_or(|t| t.elapsed() >= self.health_check_interval);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if !should_check {
            return;
        }
        match self.store.health_check().await {
            Ok(true) => {}
            Ok(false) => log::warn!("vector store health check reported unhealthy"),
            Err(err) => log::warn!("vector store health check failed: {err}"),
        }
    }

    async fn enrich_context(&self, mut result: SearchResult, include_context: bool) -> SearchResult {
        result.preview_text = Some(preview(&result.chunk.content, 280));

        if !include_context {
            return result;
        }
        let Some(root) = &self.project_root else {
            return result;
        };

        let abs_path = root.join(&result.chunk.file_path);
        let Ok(content) = tokio::fs::read_to_string(&abs_path).await else {
            return result;
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = result.chunk.start_line.saturating_sub(1);
        let end = result.chunk.end_line;

        let before_start = start.saturating_sub(self.context_lines);
        let before: Vec<String> = lines
            .get(before_start..start)
            .unwrap_or(&[])
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        let after_end = (end + self.context_lines).min(lines.len());
        let after: Vec<String> = lines
            .get(end..after_end)
            .unwrap_or(&[])
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        result.surrounding_lines = Some(SurroundingLines { before, after });
        result
    }

    /// If the store can resolve a chunk's
    /// `content_hash` back to chunks, verify it still lines up with this
    /// result's `(file, start, end)`. A mismatch is logged as a warning and
    /// the result is kept — stale-index detection informs, it doesn't
    /// censor mid-query.
    async fn check_stale(&self, results: &[SearchResult]) {
        if !self.store.supports_hash_lookup() {
            return;
        }
        for result in results {
            match self.store.get_chunks_by_hash(&result.chunk.content_hash).await {
                Ok(Some(matches)) if !matches.is_empty() => {
                    let still_resolves = matches.iter().any(|c| {
                        c.file_path == result.chunk.file_path
                            && c.start_line == result.chunk.start_line
                            && c.end_line == result.chunk.end_line
                    });
                    if !still_resolves {
                        log::warn!(
                            "stale index entry: {} no longer resolves to the same (file, range)",
                            result.navigation_hint
                        );
                    }
                }
                Ok(_) => {
                    log::warn!(
                        "stale index entry: {} content_hash has no surviving chunks",
                        result.navigation_hint
                    );
                }
                Err(err) => log::debug!("stale-index check failed for {}: {err}", result.navigation_hint),
            }
        }
    }

    /// `min(1.0, score + 0.05)` for any result whose file is in git's
    /// changed-files set.
    fn apply_recency_boost(&self, mut results: Vec<SearchResult>, changed: Option<&std::collections::HashSet<String>>) -> Vec<SearchResult> {
        let Some(changed) = changed else {
            return results;
        };
        for result in &mut results {
            if changed.contains(&result.chunk.file_path) {
                result.similarity_score = (result.similarity_score + RECENCY_BOOST).min(1.0);
            }
        }
        results
    }

    /// At most `diversity_cap` results per file, keeping the highest-scoring ones.
    /// Results are sorted by score descending before capping so "highest
    /// scoring" survives regardless of input order.
    fn apply_diversity_cap(&self, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut per_file: HashMap<String, usize> = HashMap::new();
        results
            .into_iter()
            .filter(|r| {
                let count = per_file.entry(r.chunk.file_path.clone()).or_insert(0);
                *count += 1;
                *count <= self.diversity_cap
            })
            .collect()
    }

    fn log_efficiency(&self, query: &str, results: &[SearchResult]) {
        let returned_lines: usize = results
            .iter()
            .map(|r| r.chunk.end_line.saturating_sub(r.chunk.start_line) + 1)
            .sum();
        // Without reading every candidate's full file we can only estimate
        // the "would have read the whole file" baseline from the chunk's
        // own span plus a fixed padding factor; good enough for an
        // efficiency signal, not meant as an exact accounting.
        let estimated_full_file_lines = returned_lines * 8;
        log::info!(
            "query '{query}': {} results, {returned_lines} lines returned vs ~{estimated_full_file_lines} estimated full-file lines"
        );
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let mut boundary = max_chars.min(content.len());
    while boundary > 0 && !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    content[..boundary].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::{ChunkMetadata, CodeChunk};
    use context_vector_store::JsonVectorStore;
    use std::collections::HashSet;

    fn chunk(path: &str, start: usize, end: usize, content: &str) -> CodeChunk {
        CodeChunk::new(path.to_string(), start, end, content.to_string(), ChunkMetadata::default())
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::new_for_model(dir.path().join("index.json"), "test").unwrap();
        let pipeline = QueryPipeline::new(Arc::new(store));
        let results = pipeline.search("   ", 10, SearchOptions::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_returns_ranked_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::new_for_model(dir.path().join("index.json"), "test").unwrap();
        store
            .add_chunks(vec![chunk("src/a.rs", 1, 5, "fn configure_onnx_threads() {}")], &HashMap::new())
            .await
            .unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(store);

        let pipeline = QueryPipeline::new(store);
        let results = pipeline
            .search("configure onnx threads", 10, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn diversity_cap_keeps_highest_scoring_three_per_file() {
        let dir_store = {
            let dir = tempfile::tempdir().unwrap();
            JsonVectorStore::new_for_model(dir.path().join("index.json"), "test").unwrap()
        };
        let pipeline = QueryPipeline::new(Arc::new(dir_store));

        let mut results = Vec::new();
        for i in 0..5 {
            results.push(SearchResult::from_chunk(
                chunk("src/a.rs", i * 10 + 1, i * 10 + 5, "fn x() {}"),
                0.9 - (i as f32) * 0.1,
                0,
            ));
        }
        results.push(SearchResult::from_chunk(chunk("src/b.rs", 1, 5, "fn y() {}"), 0.5, 0));

        let capped = pipeline.apply_diversity_cap(results);
        let a_count = capped.iter().filter(|r| r.chunk.file_path == "src/a.rs").count();
        assert_eq!(a_count, 3);
        // The three kept should be the highest-scoring ones (0.9, 0.8, 0.7).
        let a_scores: Vec<f32> = capped
            .iter()
            .filter(|r| r.chunk.file_path == "src/a.rs")
            .map(|r| r.similarity_score)
            .collect();
        assert!(a_scores.iter().all(|s| *s >= 0.7 - 1e-6));
    }

    #[test]
    fn recency_boost_raises_score_for_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::new_for_model(dir.path().join("index.json"), "test").unwrap();
        let pipeline = QueryPipeline::new(Arc::new(store));

        let results = vec![SearchResult::from_chunk(chunk("src/a.rs", 1, 5, "fn x() {}"), 0.9, 0)];
        let mut changed = HashSet::new();
        changed.insert("src/a.rs".to_string());

        let boosted = pipeline.apply_recency_boost(results, Some(&changed));
        assert!(boosted[0].similarity_score > 0.9);
        assert!(boosted[0].similarity_score <= 1.0);
    }

    #[test]
    fn recency_boost_clips_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::new_for_model(dir.path().join("index.json"), "test").unwrap();
        let pipeline = QueryPipeline::new(Arc::new(store));

        let results = vec![SearchResult::from_chunk(chunk("src/a.rs", 1, 5, "fn x() {}"), 0.99, 0)];
        let mut changed = HashSet::new();
        changed.insert("src/a.rs".to_string());

        let boosted = pipeline.apply_recency_boost(results, Some(&changed));
        assert_eq!(boosted[0].similarity_score, 1.0);
    }
}
