//! The `VectorStore` capability contract and a JSON-backed reference
//! implementation with in-memory cosine-similarity search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use context_code_chunker::{CodeChunk, MetricsRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::data::{IndexStats, SearchResult};
use crate::embedding::{runtime_for_model, EmbeddingRuntime, ThreadBudgetGuard};
use crate::error::{Result, VectorStoreError};
use crate::templates::EmbeddingTemplates;

/// Default CPU-thread budget handed to the embedding runtime when a caller
/// doesn't configure one explicitly (`.mcp/mcp.json`'s `onnx_num_threads`).
/// Leaves one core free for the rest of the process rather than claiming
/// every core for BLAS.
fn default_thread_budget() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(4)
}

/// Closed set of filters a query may narrow by. Anything not named here
/// (arbitrary metadata predicates, full-text expressions) is out of scope
/// for the store itself and belongs in the caller's reranking stage.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub file_path_prefix: Option<String>,
    pub chunk_type: Option<String>,
    pub class_name: Option<String>,
    pub function_name: Option<String>,
}

impl SearchFilters {
    fn matches(&self, chunk: &CodeChunk) -> bool {
        if let Some(language) = &self.language {
            if chunk.language.as_str() != language {
                return false;
            }
        }
        if let Some(prefix) = &self.file_path_prefix {
            if !chunk.file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(chunk_type) = &self.chunk_type {
            if chunk.metadata.chunk_type.as_str() != chunk_type {
                return false;
            }
        }
        if let Some(class_name) = &self.class_name {
            if chunk.metadata.class_name.as_deref() != Some(class_name.as_str()) {
                return false;
            }
        }
        if let Some(function_name) = &self.function_name {
            if chunk.metadata.function_name.as_deref() != Some(function_name.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The storage-and-retrieval capability every query pipeline depends on.
/// Required methods form the contract every backend must support;
/// `get_chunks_by_hash` is optional — backends that can't answer it cheaply
/// keep the default `Ok(None)`, and callers fall back to recomputing instead
/// of failing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add_chunks(
        &self,
        chunks: Vec<CodeChunk>,
        metrics: &HashMap<String, MetricsRecord>,
    ) -> Result<usize>;

    async fn delete_by_file(&self, path: &str) -> Result<usize>;

    async fn get_hashes_for_file(&self, path: &str) -> Result<HashMap<String, String>>;

    async fn delete_chunks(&self, ids: &[String]) -> Result<usize>;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    async fn get_stats(&self) -> Result<IndexStats>;

    async fn health_check(&self) -> Result<bool>;

    async fn get_chunks_by_hash(&self, _content_hash: &str) -> Result<Option<Vec<CodeChunk>>> {
        Ok(None)
    }

    fn supports_hash_lookup(&self) -> bool {
        false
    }

    /// Convenience default for callers searching several queries against the
    /// same store: runs each query through [`Self::search`] in turn. Backends
    /// with a real batched query path (e.g. one embedding call for every
    /// query text) should override this for a faster implementation.
    async fn search_batch(
        &self,
        queries: &[&str],
        limit: usize,
        filters: Option<&SearchFilters>,
        similarity_threshold: f32,
    ) -> Result<Vec<Vec<SearchResult>>> {
        let mut out = Vec::with_capacity(queries.len());
        for query in queries {
            out.push(self.search(query, limit, filters, similarity_threshold).await?);
        }
        Ok(out)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: CodeChunk,
    embedding: Vec<f32>,
    #[serde(default)]
    metrics: MetricsRecord,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreFile {
    model_id: String,
    chunks: Vec<StoredChunk>,
}

struct Inner {
    by_id: HashMap<String, StoredChunk>,
    dirty: bool,
}

/// Reference `VectorStore`: chunks and their embeddings persisted as one
/// JSON document, held in memory for search. Fine for the single-project
/// scale this crate targets; a production deployment would swap this for an
/// ANN-indexed backend behind the same trait.
pub struct JsonVectorStore {
    path: PathBuf,
    embedder: Arc<dyn EmbeddingRuntime>,
    templates: EmbeddingTemplates,
    inner: RwLock<Inner>,
    thread_budget: usize,
}

impl JsonVectorStore {
    /// Loads `path` if it exists (ignoring a missing file — a fresh index
    /// starts empty), otherwise starts empty.
    pub async fn open(path: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingRuntime>) -> Result<Self> {
        let path = path.into();
        let by_id = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)
                    .map_err(|e| VectorStoreError::Corrupt(e.to_string()))?;
                file.chunks
                    .into_iter()
                    .map(|sc| (sc.chunk.chunk_id.clone(), sc))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(VectorStoreError::Io(e)),
        };

        Ok(Self {
            path,
            embedder,
            templates: EmbeddingTemplates::default(),
            inner: RwLock::new(Inner { by_id, dirty: false }),
            thread_budget: default_thread_budget(),
        })
    }

    /// Fresh, empty store scoped to `model_id`: resolves the embedding
    /// runtime for that model (falling back to the deterministic hash
    /// runtime if no model asset is staged) without touching disk.
    pub fn new_for_model(path: impl Into<PathBuf>, model_id: &str) -> Result<Self> {
        Self::new_with_templates_for_model(path, model_id, EmbeddingTemplates::default())
    }

    /// Same as [`Self::new_for_model`] but rendering chunk text through
    /// `templates` before embedding instead of the default template set.
    pub fn new_with_templates_for_model(
        path: impl Into<PathBuf>,
        model_id: &str,
        templates: EmbeddingTemplates,
    ) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            embedder: runtime_for_model(model_id),
            templates,
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                dirty: false,
            }),
            thread_budget: default_thread_budget(),
        })
    }

    /// Overrides the CPU-thread budget (`.mcp/mcp.json`'s `onnx_num_threads`)
    /// applied around every [`VectorStore::add_chunks`] call.
    #[must_use]
    pub const fn with_thread_budget(mut self, threads: usize) -> Self {
        self.thread_budget = threads.max(1);
        self
    }

    /// Loads an existing store scoped to `model_id` (see [`Self::open`]).
    pub async fn load_for_model(path: impl Into<PathBuf>, model_id: &str) -> Result<Self> {
        Self::load_with_templates_for_model(path, EmbeddingTemplates::default(), model_id).await
    }

    /// Same as [`Self::load_for_model`] but rendering chunk text through
    /// `templates` before embedding instead of the default template set.
    pub async fn load_with_templates_for_model(
        path: impl Into<PathBuf>,
        templates: EmbeddingTemplates,
        model_id: &str,
    ) -> Result<Self> {
        let mut store = Self::open(path, runtime_for_model(model_id)).await?;
        store.templates = templates;
        Ok(store)
    }

    /// Drops every stored chunk whose file is not in `live_files`
    /// (normalized relative paths), returning how many were removed. Used
    /// by incremental reindexing to clear chunks for deleted/renamed files.
    pub async fn purge_missing_files(&self, live_files: &std::collections::HashSet<String>) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.by_id.len();
        inner.by_id.retain(|_, sc| live_files.contains(&sc.chunk.file_path));
        let removed = before - inner.by_id.len();
        if removed > 0 {
            inner.dirty = true;
        }
        removed
    }

    /// Drops every chunk belonging to `path`. Named distinctly from
    /// [`VectorStore::delete_by_file`] at the call sites that rebuild a
    /// single file's chunks (remove-then-reinsert), even though the
    /// underlying behavior is the same operation.
    pub async fn remove_chunks_for_file(&self, path: &str) -> Result<usize> {
        self.delete_by_file(path).await
    }

    /// Writes the current in-memory state to `path` via write-temp-then-rename,
    /// so a crash mid-write never leaves a half-written manifest on disk.
    pub async fn save(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.dirty {
            return Ok(());
        }

        let file = StoreFile {
            model_id: self.embedder.model_id().to_string(),
            chunks: inner.by_id.values().cloned().collect(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        inner.dirty = false;
        Ok(())
    }

    fn embedding_text(&self, chunk: &CodeChunk) -> String {
        match self.templates.render_doc_chunk(chunk) {
            Ok(rendered) => rendered,
            Err(e) => {
                log::warn!("template rendering failed for {}: {e}, using raw content", chunk.file_path);
                match chunk.context_prefix_line() {
                    Some(prefix) => format!("{prefix}\n{}", chunk.content),
                    None => chunk.content.clone(),
                }
            }
        }
    }
}

#[async_trait]
impl VectorStore for JsonVectorStore {
    async fn add_chunks(
        &self,
        chunks: Vec<CodeChunk>,
        metrics: &HashMap<String, MetricsRecord>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| self.embedding_text(c)).collect();

        // Scoped CPU-thread budget, acquired around the single embed call,
        // restored on every exit path (success or the `?` below) via `Drop`,
        // never left mutated for the rest of the process.
        let budget_guard = ThreadBudgetGuard::acquire(self.thread_budget, self.embedder.as_ref());
        let embed_result = self.embedder.embed(&texts).await;
        drop(budget_guard);
        let embeddings = embed_result?;

        if embeddings.len() != chunks.len() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "embedding runtime returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut inner = self.inner.write().await;
        let count = chunks.len();
        for (chunk, embedding) in chunks.into_iter().zip(embeddings.into_iter()) {
            let chunk_metrics = metrics.get(&chunk.chunk_id).cloned().unwrap_or_default();
            inner.by_id.insert(
                chunk.chunk_id.clone(),
                StoredChunk { chunk, embedding, metrics: chunk_metrics },
            );
        }
        inner.dirty = true;
        Ok(count)
    }

    async fn delete_by_file(&self, path: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.by_id.len();
        inner.by_id.retain(|_, sc| sc.chunk.file_path != path);
        let removed = before - inner.by_id.len();
        if removed > 0 {
            inner.dirty = true;
        }
        Ok(removed)
    }

    async fn get_hashes_for_file(&self, path: &str) -> Result<HashMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_id
            .values()
            .filter(|sc| sc.chunk.file_path == path)
            .map(|sc| (sc.chunk.chunk_id.clone(), sc.chunk.content_hash.clone()))
            .collect())
    }

    async fn delete_chunks(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for id in ids {
            if inner.by_id.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            inner.dirty = true;
        }
        Ok(removed)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VectorStoreError::EmbeddingError("embedding runtime returned no vector".into()))?;

        let inner = self.inner.read().await;
        let mut scored: Vec<(f32, &StoredChunk)> = inner
            .by_id
            .values()
            .filter(|sc| filters.map_or(true, |f| f.matches(&sc.chunk)))
            .map(|sc| (cosine_similarity(&query_embedding, &sc.embedding), sc))
            .filter(|(score, _)| *score >= similarity_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, sc))| SearchResult::from_chunk(sc.chunk.clone(), score, i + 1))
            .collect())
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let inner = self.inner.read().await;
        let mut stats = IndexStats {
            embedding_model: self.embedder.model_id().to_string(),
            ..IndexStats::default()
        };
        let mut seen_files = std::collections::HashSet::new();
        for sc in inner.by_id.values() {
            if seen_files.insert(sc.chunk.file_path.clone()) {
                let extension = Path::new(&sc.chunk.file_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string();
                stats.add_file(sc.chunk.language.as_str(), &extension);
            }
        }
        stats.add_chunks(inner.by_id.len());
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.path.parent().map_or(true, Path::exists))
    }

    async fn get_chunks_by_hash(&self, content_hash: &str) -> Result<Option<Vec<CodeChunk>>> {
        let inner = self.inner.read().await;
        let matches: Vec<CodeChunk> = inner
            .by_id
            .values()
            .filter(|sc| sc.chunk.content_hash == content_hash)
            .map(|sc| sc.chunk.clone())
            .collect();
        Ok(Some(matches))
    }

    fn supports_hash_lookup(&self) -> bool {
        true
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::ChunkMetadata;
    use crate::embedding::HashEmbeddingRuntime;

    fn chunk(path: &str, content: &str) -> CodeChunk {
        CodeChunk::new(path.to_string(), 1, 3, content.to_string(), ChunkMetadata::default())
    }

    #[tokio::test]
    async fn add_then_search_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbeddingRuntime::new(32));
        let store = JsonVectorStore::open(dir.path().join("index.json"), embedder).await.unwrap();

        store
            .add_chunks(vec![chunk("src/a.rs", "fn add(a: i32, b: i32) -> i32 { a + b }")], &HashMap::new())
            .await
            .unwrap();

        let results = store.search("fn add", 5, None, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/a.rs");
    }

    #[tokio::test]
    async fn delete_by_file_removes_all_its_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbeddingRuntime::new(16));
        let store = JsonVectorStore::open(dir.path().join("index.json"), embedder).await.unwrap();

        store
            .add_chunks(vec![chunk("src/a.rs", "one"), chunk("src/b.rs", "two")], &HashMap::new())
            .await
            .unwrap();

        let removed = store.delete_by_file("src/a.rs").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn save_and_reopen_preserves_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let embedder: Arc<dyn EmbeddingRuntime> = Arc::new(HashEmbeddingRuntime::new(16));

        {
            let store = JsonVectorStore::open(&path, Arc::clone(&embedder)).await.unwrap();
            store.add_chunks(vec![chunk("src/a.rs", "persisted")], &HashMap::new()).await.unwrap();
            store.save().await.unwrap();
        }

        let reopened = JsonVectorStore::open(&path, embedder).await.unwrap();
        assert_eq!(reopened.get_stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn metrics_persist_alongside_their_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let embedder: Arc<dyn EmbeddingRuntime> = Arc::new(HashEmbeddingRuntime::new(16));
        let c = chunk("src/a.rs", "fn add(a: i32, b: i32) -> i32 { a + b }");
        let mut metrics = HashMap::new();
        metrics.insert(c.chunk_id.clone(), MetricsRecord { loc: 1, ..MetricsRecord::default() });

        {
            let store = JsonVectorStore::open(&path, Arc::clone(&embedder)).await.unwrap();
            store.add_chunks(vec![c], &metrics).await.unwrap();
            store.save().await.unwrap();
        }

        let reopened = JsonVectorStore::open(&path, embedder).await.unwrap();
        let results = reopened.search("fn add", 5, None, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn filters_narrow_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbeddingRuntime::new(16));
        let store = JsonVectorStore::open(dir.path().join("index.json"), embedder).await.unwrap();

        store
            .add_chunks(vec![chunk("src/a.py", "shared"), chunk("src/b.rs", "shared")], &HashMap::new())
            .await
            .unwrap();

        let filters = SearchFilters {
            language: Some("python".to_string()),
            ..Default::default()
        };
        let results = store.search("shared", 10, Some(&filters), 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/a.py");
    }
}
