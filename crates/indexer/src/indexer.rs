use crate::config::ProjectConfig;
use crate::directory_index::{build_directory_index, save_directory_index, IndexedFile};
use crate::error::{IndexerError, Result};
use crate::hash_store::HashStore;
use crate::priority::sort_by_priority;
use crate::relationship_store::{build_relationships, relationships_path};
use crate::scanner::FileScanner;
use crate::stats::IndexStats;
use chrono::{DateTime, Utc};
use context_code_chunker::{Chunker, ChunkerConfig};
use context_vector_store::current_model_id;
use context_vector_store::EmbeddingTemplates;
use context_vector_store::JsonVectorStore;
use context_vector_store::VectorStore as _;
use context_vector_store::{corpus_path_for_project_root, ChunkCorpus};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// How often `index_with_mode` emits a progress heartbeat during a long run.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ModelIndexSpec {
    pub model_id: String,
    pub templates: EmbeddingTemplates,
}

impl ModelIndexSpec {
    pub fn new(model_id: impl Into<String>, templates: EmbeddingTemplates) -> Self {
        Self {
            model_id: model_id.into(),
            templates,
        }
    }
}

/// Project indexer that scans, chunks, and indexes code
pub struct ProjectIndexer {
    root: PathBuf,
    store_path: PathBuf,
    model_id: String,
    chunker: Chunker,
    templates: Option<EmbeddingTemplates>,
}

/// Multi-model project indexer that scans/chunks files once and embeds the resulting chunks into
/// multiple model-specific indices.
pub struct MultiModelProjectIndexer {
    root: PathBuf,
    chunker: Chunker,
}

impl ProjectIndexer {
    /// Create new indexer for project
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let model_id = current_model_id().unwrap_or_else(|_| "bge-small".to_string());
        Self::new_with_model_and_templates(root, model_id, None).await
    }

    pub async fn new_for_model(
        root: impl AsRef<Path>,
        model_id: impl Into<String>,
    ) -> Result<Self> {
        Self::new_with_model_and_templates(root, model_id.into(), None).await
    }

    pub async fn new_with_embedding_templates(
        root: impl AsRef<Path>,
        templates: EmbeddingTemplates,
    ) -> Result<Self> {
        let model_id = current_model_id().unwrap_or_else(|_| "bge-small".to_string());
        Self::new_with_model_and_templates(root, model_id, Some(templates)).await
    }

    pub async fn new_for_model_with_embedding_templates(
        root: impl AsRef<Path>,
        model_id: impl Into<String>,
        templates: EmbeddingTemplates,
    ) -> Result<Self> {
        Self::new_with_model_and_templates(root, model_id.into(), Some(templates)).await
    }

    async fn new_with_model_and_templates(
        root: impl AsRef<Path>,
        model_id: String,
        templates: Option<EmbeddingTemplates>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(IndexerError::InvalidPath(format!(
                "Path does not exist: {}",
                root.display()
            )));
        }

        let model_dir = model_id_dir_name(&model_id);
        let store_path = root
            .join(".mcp-code-intelligence")
            .join("indexes")
            .join(model_dir)
            .join("index.json");

        // Create .mcp-code-intelligence directory if needed
        if let Some(parent) = store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let chunker = Chunker::new(ChunkerConfig::for_embeddings());

        Ok(Self {
            root,
            store_path,
            model_id,
            chunker,
            templates,
        })
    }

    /// Index the project (with incremental support)
    pub async fn index(&self) -> Result<IndexStats> {
        self.index_with_mode(false, false).await
    }

    /// Index the project in full mode (skip incremental check)
    pub async fn index_full(&self) -> Result<IndexStats> {
        self.index_with_mode(true, false).await
    }

    /// `index_project(force_reindex, skip_relationships)` as named in the
    /// algorithm: the same incremental/full pipeline, with the relationship
    /// sidecar rebuild made optional for callers that don't need it (it's
    /// derived data, re-derivable from the chunk corpus at any time).
    pub async fn index_with_options(&self, force_full: bool, skip_relationships: bool) -> Result<IndexStats> {
        self.index_with_mode(force_full, skip_relationships).await
    }

    /// Index with specified mode
    #[allow(clippy::cognitive_complexity)]
    #[allow(clippy::too_many_lines)]
    async fn index_with_mode(&self, force_full: bool, skip_relationships: bool) -> Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::new();

        log::info!("Indexing project at {}", self.root.display());
        if let Err(err) = crate::health::log_run_start(&self.root, env!("CARGO_PKG_VERSION")).await {
            log::warn!("failed to write run-start banner: {err}");
        }

        // 0. Load project config (.mcp/mcp.json): extension allow-list, size
        // cap, batching/throttle knobs. A missing/corrupt config degrades to
        // defaults rather than failing the run.
        let config = ProjectConfig::load(&self.root).await;

        // 1. Scan for files
        let scanner = match config.extensions_override() {
            Some(extensions) => FileScanner::with_extensions(&self.root, extensions),
            None => FileScanner::new(&self.root),
        }
        .with_max_file_size_kb(config.max_file_size_kb);
        let files = scanner.scan();
        let live_files: HashSet<String> = files.iter().map(|p| self.normalize_path(p)).collect();

        let corpus_path = corpus_path_for_project_root(&self.root);
        let (mut corpus, corpus_full_rebuild) = if force_full {
            (ChunkCorpus::new(), true)
        } else if corpus_path.exists() {
            match ChunkCorpus::load(&corpus_path).await {
                Ok(corpus) => (corpus, false),
                Err(err) => {
                    log::warn!(
                        "Failed to load chunk corpus {}: {err}; will rebuild corpus",
                        corpus_path.display()
                    );
                    (ChunkCorpus::new(), true)
                }
            }
        } else {
            (ChunkCorpus::new(), true)
        };
        let mut corpus_dirty = corpus_full_rebuild;

        // Stale-lock recovery: drop any -journal/-wal/-shm sidecars left behind by a
        // process that died mid-write before we try to open the store.
        crate::hash_store::clean_stale_db_sidecars(&self.store_path).await;

        // 2. Load or create vector store
        let allow_incremental_store =
            !force_full && !corpus_full_rebuild && self.store_path.exists();
        let (mut store, existing_hashes) = if allow_incremental_store {
            log::info!("Loading existing index for incremental update");
            let loaded = if let Some(templates) = self.templates.clone() {
                JsonVectorStore::load_with_templates_for_model(
                    &self.store_path,
                    templates,
                    &self.model_id,
                )
                .await
            } else {
                JsonVectorStore::load_for_model(&self.store_path, &self.model_id).await
            };
            match loaded {
                Ok(store) => {
                    let hash_store = HashStore::load(&self.root).await;
                    (store, Some(hash_store))
                }
                Err(e) => {
                    log::warn!("Failed to load existing index: {e}, starting fresh");
                    let store = if let Some(templates) = self.templates.clone() {
                        JsonVectorStore::new_with_templates_for_model(
                            &self.store_path,
                            &self.model_id,
                            templates,
                        )?
                    } else {
                        JsonVectorStore::new_for_model(&self.store_path, &self.model_id)?
                    };
                    (store, None)
                }
            }
        } else {
            if corpus_full_rebuild && self.store_path.exists() {
                log::info!(
                    "Chunk corpus rebuild detected; rebuilding semantic index at {}",
                    self.store_path.display()
                );
            }
            let store = if let Some(templates) = self.templates.clone() {
                JsonVectorStore::new_with_templates_for_model(
                    &self.store_path,
                    &self.model_id,
                    templates,
                )?
            } else {
                JsonVectorStore::new_for_model(&self.store_path, &self.model_id)?
            };
            (store, None)
        };

        // 3. Determine which files to process: mtime is a fast-skip, the content
        // hash is the actual source of truth (a touched-but-unchanged file must
        // not trigger a re-embed).
        let files_to_process = if corpus_full_rebuild {
            files.clone()
        } else if let Some(ref hash_store) = existing_hashes {
            self.filter_changed_files(&files, hash_store).await?
        } else {
            files.clone()
        };

        if existing_hashes.is_some() {
            log::info!(
                "Incremental: processing {} of {} files",
                files_to_process.len(),
                files.len()
            );

            // Purge chunks that belong to files no longer present in the project (deleted/renamed).
            let removed = store.purge_missing_files(&live_files).await;
            if removed > 0 {
                log::info!("Purged {removed} stale chunks from deleted files");
            }

            let removed = corpus.purge_missing_files(&live_files);
            if removed > 0 {
                log::info!("Purged {removed} missing files from chunk corpus");
                corpus_dirty = true;
            }
        }

        // 4. Process files (micro-batched, prioritized, heartbeat-logged)
        let mut hash_store = existing_hashes.unwrap_or_else(|| HashStore::empty(&self.root));
        let previous_records = hash_store.snapshot();

        // Record mtime + content hash for every live file up front, so the manifest
        // we persist at the end reflects the full project, not just what changed.
        // A file that fails to parse later has its entry reverted below instead of
        // left at whatever this upfront pass wrote.
        let mut last_modified_rfc3339: HashMap<String, String> = HashMap::new();
        for file_path in &files {
            if let Ok(metadata) = tokio::fs::metadata(&file_path).await {
                if let Ok(modified) = metadata.modified() {
                    if let Ok(duration) = modified.duration_since(SystemTime::UNIX_EPOCH) {
                        let relative_path = self.normalize_path(file_path);
                        let rfc3339 = DateTime::<Utc>::from(modified).to_rfc3339();
                        last_modified_rfc3339.insert(relative_path.clone(), rfc3339);
                        if let Ok(content) = tokio::fs::read_to_string(&file_path).await {
                            #[allow(clippy::cast_precision_loss)]
                            hash_store.record(relative_path, duration.as_secs_f64(), &content);
                        }
                    }
                }
            }
        }
        hash_store.retain_live(&live_files);

        // Process changed files in micro-batches (with concurrency limit within
        // each batch). `changed_rels` are the files this run actually needs to
        // (re-)embed; `corpus_targets` additionally includes untouched files on
        // a full rebuild, since the corpus itself has to be rebuilt from scratch.
        let changed_rels: HashSet<String> = files_to_process
            .iter()
            .map(|p| self.normalize_path(p))
            .collect();
        let corpus_targets: Vec<PathBuf> = if corpus_full_rebuild {
            files.clone()
        } else {
            files_to_process.clone()
        };

        // 5. Prioritize: git-modified/entry-point/doc/shallow-depth files
        // sort first, ties broken by path.
        let changed_in_git = crate::watermark_io::changed_files(&self.root).await.unwrap_or_default();
        let mut abs_by_rel: HashMap<String, PathBuf> = HashMap::new();
        for file_path in &corpus_targets {
            abs_by_rel.insert(self.normalize_path(file_path), file_path.clone());
        }
        let mut ordered_rels: Vec<String> = abs_by_rel.keys().cloned().collect();
        sort_by_priority(&mut ordered_rels, &changed_in_git);

        let incremental_run = !corpus_full_rebuild;
        let batch_size = config.batch_size.max(1);
        let total = ordered_rels.len();
        let mut processed_count = 0usize;
        let mut last_heartbeat = Instant::now();
        let mut indexed_files: Vec<IndexedFile> = Vec::new();
        let mut failed_rels: HashSet<String> = HashSet::new();

        for batch_rels in ordered_rels.chunks(batch_size) {
            let batch_paths: Vec<PathBuf> = batch_rels
                .iter()
                .filter_map(|rel| abs_by_rel.get(rel).cloned())
                .collect();
            if batch_paths.is_empty() {
                continue;
            }

            let results = self.process_files_parallel(&batch_paths).await?;

            let mut batch_chunks: Vec<context_code_chunker::CodeChunk> = Vec::new();
            let mut succeeded_rels: HashSet<String> = HashSet::new();
            for result in results {
                match result {
                    Ok((relative_path, chunks, language, lines)) => {
                        succeeded_rels.insert(relative_path.clone());
                        stats.add_file(&language, lines);
                        stats.add_chunks(chunks.len());

                        corpus.set_file_chunks(relative_path.clone(), chunks.clone());
                        corpus_dirty = true;

                        indexed_files.push(IndexedFile {
                            relative_path: relative_path.clone(),
                            chunk_count: chunks.len(),
                            last_modified: last_modified_rfc3339
                                .get(&relative_path)
                                .cloned()
                                .unwrap_or_default(),
                        });

                        if changed_rels.contains(&relative_path) {
                            if incremental_run {
                                store.remove_chunks_for_file(&relative_path).await?;
                            }
                            batch_chunks.extend(chunks);
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to process file: {e}");
                        stats.add_error(e);
                    }
                }
            }

            // A batch_rel with no matching success (read error, chunker error,
            // or a panicked task) is a failure; track it by relative path
            // rather than parsing the error string, which carries an absolute
            // path and isn't guaranteed to name the file at all (a panic's
            // message doesn't).
            for rel in batch_rels {
                if !succeeded_rels.contains(rel) {
                    failed_rels.insert(rel.clone());
                }
            }

            // Embed and persist the whole batch's chunks in one call; the
            // CPU-thread budget guard lives inside `JsonVectorStore::add_chunks`
            // itself.
            if !batch_chunks.is_empty() {
                let batch_metrics = self.chunker.chunk_metrics(&batch_chunks);
                store.add_chunks(batch_chunks, &batch_metrics).await?;
            }

            // HashStore is persisted after every batch so a killed run never
            // loses more than one batch's worth of progress.
            hash_store.save().await?;

            processed_count += batch_paths.len();
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                log::info!(
                    "Indexing heartbeat: {processed_count}/{total} files done, {} indexed, {} failed",
                    stats.files,
                    stats.failed()
                );
                last_heartbeat = Instant::now();
            }

            if config.throttle_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.throttle_delay_ms)).await;
            }
        }

        // A file that failed to parse this run keeps its previous HashStore
        // entry (or none, if it never had one) so the next run retries it
        // instead of silently treating it as "up to date".
        for rel in &failed_rels {
            match previous_records.get(rel) {
                Some(record) => hash_store.set_record(rel.clone(), record.clone()),
                None => hash_store.remove(rel),
            }
        }

        // 8. Rebuild the directory aggregate from every file this run
        // successfully indexed.
        if !indexed_files.is_empty() {
            let directory_index = build_directory_index(&indexed_files);
            if let Err(err) = save_directory_index(&self.root, &directory_index).await {
                log::warn!("failed to persist directory_index.json: {err}");
            }
        }

        // Relationship sidecar: rebuilt wholesale from the full chunk corpus
        // (not just this run's delta) so it always reflects every chunk
        // currently live, the same "rebuild, don't incrementally patch"
        // posture as directory_index.json. Skippable per-call since it's
        // derived data a caller can regenerate later.
        if !skip_relationships {
            let relationships = build_relationships(corpus.all_chunks());
            if let Err(err) = relationships.save(&self.root).await {
                log::warn!(
                    "failed to persist {}: {err}",
                    relationships_path(&self.root).display()
                );
            }
        }

        // 5 (cont'd). Save store and the hash manifest
        if corpus_dirty {
            corpus.save(&corpus_path).await?;
        }
        store.save().await?;
        hash_store.save().await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.time_ms = start.elapsed().as_millis() as u64;
            if stats.time_ms == 0 {
                stats.time_ms = 1;
            }
        }
        log::info!("Indexing completed: {stats:?}");

        Ok(stats)
    }

    /// Files that have changed since last index: mtime newer than recorded AND a
    /// differing content hash. A file whose mtime moved (e.g. a `touch`, a
    /// checkout that resets timestamps) but whose bytes are identical is not
    /// reindexed.
    async fn filter_changed_files(
        &self,
        files: &[PathBuf],
        hash_store: &HashStore,
    ) -> Result<Vec<PathBuf>> {
        let mut changed = Vec::new();

        for file_path in files {
            let relative_path = self.normalize_path(file_path);

            let metadata = tokio::fs::metadata(file_path).await?;
            let modified = metadata.modified()?;
            let mtime = modified.duration_since(SystemTime::UNIX_EPOCH)?.as_secs_f64();
            let content = tokio::fs::read_to_string(file_path)
                .await
                .unwrap_or_default();

            if hash_store.needs_reindex(&relative_path, mtime, &content) {
                changed.push(file_path.clone());
            }
        }

        Ok(changed)
    }

    /// Process files in parallel with concurrency limit
    async fn process_files_parallel(
        &self,
        files: &[PathBuf],
    ) -> Result<
        Vec<
            std::result::Result<
                (String, Vec<context_code_chunker::CodeChunk>, String, usize),
                String,
            >,
        >,
    > {
        const MAX_CONCURRENT: usize = 16;

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut aggregated = Vec::with_capacity(files.len());

        for file_chunk in files.chunks(MAX_CONCURRENT) {
            let mut tasks = Vec::with_capacity(file_chunk.len());
            for file_path in file_chunk {
                let file_path = file_path.clone();
                let task = tokio::spawn(async move { Self::read_file_static(file_path).await });
                tasks.push(task);
            }

            for task in tasks {
                match task.await {
                    Ok(Ok((file_path, content, lines))) => {
                        let relative_path = self.normalize_path(&file_path);
                        match self.chunker.chunk_str(&content, Some(&relative_path)) {
                            Ok(chunks) => {
                                if chunks.is_empty() {
                                    aggregated.push(Ok((
                                        relative_path,
                                        vec![],
                                        "unknown".to_string(),
                                        lines,
                                    )));
                                } else {
                                    let language = chunks[0].language.as_str().to_string();
                                    aggregated.push(Ok((relative_path, chunks, language, lines)));
                                }
                            }
                            Err(e) => {
                                aggregated.push(Err(format!("{}: {e}", file_path.display())));
                            }
                        }
                    }
                    Ok(Err(e)) => aggregated.push(Err(e)),
                    Err(e) => aggregated.push(Err(format!("Task panicked: {e}"))),
                }
            }
        }

        Ok(aggregated)
    }

    /// Static method for file reading (IO bound)
    async fn read_file_static(
        file_path: PathBuf,
    ) -> std::result::Result<(PathBuf, String, usize), String> {
        let content = tokio::fs::read_to_string(&file_path)
            .await
            .map_err(|e| format!("{}: {e}", file_path.display()))?;

        let lines = content.lines().count();

        Ok((file_path, content, lines))
    }

    /// Process single file (legacy method, kept for compatibility)
    #[allow(dead_code)]
    async fn process_file(
        &self,
        file_path: &Path,
        store: &mut JsonVectorStore,
        stats: &mut IndexStats,
    ) -> Result<()> {
        log::debug!("Processing file: {}", file_path.display());

        let content = tokio::fs::read_to_string(file_path).await?;
        let lines = content.lines().count();

        // Chunk the file
        let relative_path = self.normalize_path(file_path);
        let chunks = self.chunker.chunk_str(&content, Some(&relative_path))?;

        if chunks.is_empty() {
            return Ok(());
        }

        let language = chunks[0].language.as_str();

        stats.add_file(language, lines);
        stats.add_chunks(chunks.len());

        // Add to vector store (batch embedding happens here)
        let metrics = self.chunker.chunk_metrics(&chunks);
        store.add_chunks(chunks, &metrics).await?;

        Ok(())
    }

    /// Get store path
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Get project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn normalize_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        let mut normalized = relative.to_string_lossy().to_string();
        if normalized.contains('\\') {
            normalized = normalized.replace('\\', "/");
        }
        normalized
    }
}

fn model_id_dir_name(model_id: &str) -> String {
    model_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

impl MultiModelProjectIndexer {
    #[allow(clippy::unused_async)]
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(IndexerError::InvalidPath(format!(
                "Path does not exist: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            chunker: Chunker::new(ChunkerConfig::for_embeddings()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Index a project for multiple models.
    ///
    /// Design goals:
    /// - Scan + chunk once (union of changed files across models),
    /// - Keep incremental correctness per model (per-model mtimes + purge),
    /// - Avoid process-global env mutation (explicit `model_id` wiring).
    #[allow(clippy::cognitive_complexity)]
    #[allow(clippy::too_many_lines)]
    pub async fn index_models(
        &self,
        models: &[ModelIndexSpec],
        force_full: bool,
    ) -> Result<IndexStats> {
        struct ModelPlan {
            model_id: String,
            store_path: PathBuf,
            mtimes_path: PathBuf,
            templates: EmbeddingTemplates,
            incremental: bool,
            changed_files: HashSet<String>,
        }

        let started = Instant::now();
        if models.is_empty() {
            return Err(IndexerError::Other(
                "Multi-model indexing requires at least one model".to_string(),
            ));
        }

        log::info!(
            "Indexing project at {} (models={})",
            self.root.display(),
            models.len()
        );

        // 1. Scan for files once.
        let scanner = FileScanner::new(&self.root);
        let files = scanner.scan();

        let live_files: HashSet<String> = files.iter().map(|p| self.normalize_path(p)).collect();

        let corpus_path = corpus_path_for_project_root(&self.root);
        let (mut corpus, corpus_full_rebuild) = if force_full {
            (ChunkCorpus::new(), true)
        } else if corpus_path.exists() {
            match ChunkCorpus::load(&corpus_path).await {
                Ok(corpus) => (corpus, false),
                Err(err) => {
                    log::warn!(
                        "Failed to load chunk corpus {}: {err}; will rebuild corpus",
                        corpus_path.display()
                    );
                    (ChunkCorpus::new(), true)
                }
            }
        } else {
            (ChunkCorpus::new(), true)
        };
        let mut corpus_dirty = corpus_full_rebuild;

        // 2. Compute current mtimes for all files once.
        let mut current_mtimes: HashMap<String, u64> = HashMap::new();
        for file_path in &files {
            if let Ok(metadata) = tokio::fs::metadata(&file_path).await {
                if let Ok(modified) = metadata.modified() {
                    if let Ok(duration) = modified.duration_since(SystemTime::UNIX_EPOCH) {
                        current_mtimes.insert(self.normalize_path(file_path), duration.as_secs());
                    }
                }
            }
        }

        // 3. Load per-model mtimes, compute union of changed files.
        let mut plans: Vec<ModelPlan> = Vec::with_capacity(models.len());
        let mut union_changed: HashSet<String> = HashSet::new();
        let mut abs_by_rel: HashMap<String, PathBuf> = HashMap::new();
        for file_path in &files {
            abs_by_rel.insert(self.normalize_path(file_path), file_path.clone());
        }

        for spec in models {
            let model_id = spec.model_id.trim().to_string();
            if model_id.is_empty() {
                return Err(IndexerError::Other(
                    "model_id must not be empty".to_string(),
                ));
            }

            let model_dir = model_id_dir_name(&model_id);
            let store_path = self
                .root
                .join(".mcp-code-intelligence")
                .join("indexes")
                .join(model_dir)
                .join("index.json");
            if let Some(parent) = store_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mtimes_path = store_path
                .parent()
                .expect("index.json has a parent dir")
                .join("mtimes.json");

            let incremental = !force_full && !corpus_full_rebuild && store_path.exists();
            let existing_mtimes = if incremental && mtimes_path.exists() {
                let json = tokio::fs::read_to_string(&mtimes_path).await?;
                serde_json::from_str::<HashMap<String, u64>>(&json)?
            } else {
                HashMap::new()
            };

            let mut changed_files = HashSet::new();
            if force_full || corpus_full_rebuild || !store_path.exists() {
                // Fresh index: process everything.
                for rel in current_mtimes.keys() {
                    changed_files.insert(rel.clone());
                }
            } else {
                for (rel, mtime) in &current_mtimes {
                    let is_changed = existing_mtimes.get(rel).is_none_or(|old| mtime > old);
                    if is_changed {
                        changed_files.insert(rel.clone());
                    }
                }
            }

            union_changed.extend(changed_files.iter().cloned());
            plans.push(ModelPlan {
                model_id,
                store_path,
                mtimes_path,
                templates: spec.templates.clone(),
                incremental,
                changed_files,
            });
        }

        // 4. Chunk the union set once.
        let mut stats = IndexStats::new();
        let mut union_paths: Vec<PathBuf> = if corpus_full_rebuild {
            files.clone()
        } else {
            union_changed
                .iter()
                .filter_map(|rel| abs_by_rel.get(rel).cloned())
                .collect()
        };
        union_paths.sort();

        let processed = if union_paths.is_empty() {
            Vec::new()
        } else {
            self.process_files_parallel(&union_paths).await?
        };

        let mut processed_by_rel: HashMap<String, Vec<context_code_chunker::CodeChunk>> =
            HashMap::new();
        let mut processed_errs: HashMap<String, String> = HashMap::new();

        for result in processed {
            match result {
                Ok((relative_path, chunks, language, lines)) => {
                    stats.add_file(&language, lines);
                    stats.add_chunks(chunks.len());
                    processed_by_rel.insert(relative_path, chunks);
                }
                Err(err) => {
                    stats.add_error(err.clone());
                    // Best-effort: parse "path: error" prefix if present.
                    let rel = err.split_once(':').map(|(p, _)| p.trim().to_string());
                    if let Some(rel) = rel {
                        processed_errs.insert(rel, err);
                    }
                }
            }
        }

        if !corpus_full_rebuild {
            let removed = corpus.purge_missing_files(&live_files);
            if removed > 0 {
                log::info!("Purged {removed} missing files from chunk corpus");
                corpus_dirty = true;
            }
        }

        for (relative_path, chunks) in &processed_by_rel {
            if processed_errs.contains_key(relative_path) {
                continue;
            }
            corpus.set_file_chunks(relative_path.clone(), chunks.clone());
            corpus_dirty = true;
        }

        if corpus_dirty {
            corpus.save(&corpus_path).await?;
        }

        let all_changed_chunks: Vec<context_code_chunker::CodeChunk> =
            processed_by_rel.values().flatten().cloned().collect();
        let union_metrics = self.chunker.chunk_metrics(&all_changed_chunks);

        // 5. Apply the chunk deltas per model (embed + update store).
        for plan in plans {
            let mut store = if plan.incremental && plan.store_path.exists() {
                let loaded = JsonVectorStore::load_with_templates_for_model(
                    &plan.store_path,
                    plan.templates.clone(),
                    &plan.model_id,
                )
                .await;
                match loaded {
                    Ok(store) => store,
                    Err(e) => {
                        log::warn!(
                            "Failed to load existing index {}: {e}, starting fresh",
                            plan.store_path.display()
                        );
                        JsonVectorStore::new_with_templates_for_model(
                            &plan.store_path,
                            &plan.model_id,
                            plan.templates.clone(),
                        )?
                    }
                }
            } else {
                JsonVectorStore::new_with_templates_for_model(
                    &plan.store_path,
                    &plan.model_id,
                    plan.templates.clone(),
                )?
            };

            if plan.incremental {
                let removed = store.purge_missing_files(&live_files).await;
                if removed > 0 {
                    log::info!("Purged {removed} stale chunks for model {}", plan.model_id);
                }
            }

            for rel in &plan.changed_files {
                if processed_errs.contains_key(rel) {
                    continue;
                }
                let Some(chunks) = processed_by_rel.get(rel) else {
                    continue;
                };

                if plan.incremental {
                    store.remove_chunks_for_file(rel).await?;
                }

                store.add_chunks(chunks.clone(), &union_metrics).await?;
            }

            store.save().await?;

            // Persist mtimes for this model so incremental correctness is per-model (avoids
            // cross-model skew if users index subsets of experts).
            let json = serde_json::to_string_pretty(&current_mtimes)?;
            tokio::fs::write(&plan.mtimes_path, json).await?;
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.time_ms = started.elapsed().as_millis() as u64;
            if stats.time_ms == 0 {
                stats.time_ms = 1;
            }
        }

        Ok(stats)
    }

    fn normalize_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        let mut normalized = relative.to_string_lossy().to_string();
        if normalized.contains('\\') {
            normalized = normalized.replace('\\', "/");
        }
        normalized
    }

    async fn process_files_parallel(
        &self,
        files: &[PathBuf],
    ) -> Result<
        Vec<
            std::result::Result<
                (String, Vec<context_code_chunker::CodeChunk>, String, usize),
                String,
            >,
        >,
    > {
        const MAX_CONCURRENT: usize = 16;

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut aggregated = Vec::with_capacity(files.len());

        for file_chunk in files.chunks(MAX_CONCURRENT) {
            let mut tasks = Vec::with_capacity(file_chunk.len());
            for file_path in file_chunk {
                let file_path = file_path.clone();
                let task =
                    tokio::spawn(async move { ProjectIndexer::read_file_static(file_path).await });
                tasks.push(task);
            }

            for task in tasks {
                match task.await {
                    Ok(Ok((file_path, content, lines))) => {
                        let relative_path = self.normalize_path(&file_path);
                        match self.chunker.chunk_str(&content, Some(&relative_path)) {
                            Ok(chunks) => {
                                if chunks.is_empty() {
                                    aggregated.push(Ok((
                                        relative_path,
                                        vec![],
                                        "unknown".to_string(),
                                        lines,
                                    )));
                                } else {
                                    let language = chunks[0].language.as_str().to_string();
                                    aggregated.push(Ok((relative_path, chunks, language, lines)));
                                }
                            }
                            Err(e) => {
                                aggregated.push(Err(format!("{}: {e}", file_path.display())));
                            }
                        }
                    }
                    Ok(Err(e)) => aggregated.push(Err(e)),
                    Err(e) => aggregated.push(Err(format!("Task panicked: {e}"))),
                }
            }
        }

        Ok(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_indexing() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.rs");

        tokio::fs::write(
            &test_file,
            r#"
fn hello() {
    println!("hello");
}

struct Point {
    x: i32,
    y: i32,
}
"#,
        )
        .await
        .unwrap();

        let indexer = ProjectIndexer::new(temp_dir.path()).await.unwrap();
        let stats = indexer.index().await.unwrap();

        assert!(stats.files > 0);
        assert!(stats.chunks > 0);
    }
}
