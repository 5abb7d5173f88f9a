//! Model-independent cache of parsed chunks, keyed by project-relative file
//! path. A project indexed against several embedding models parses and
//! chunks every file once and reuses that corpus across each model's own
//! `JsonVectorStore` instead of re-running the chunker per model.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use context_code_chunker::CodeChunk;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VectorStoreError};

const CHUNK_CORPUS_FILE_NAME: &str = "chunk_corpus.json";

/// `<root>/.mcp-code-intelligence/chunk_corpus.json`.
#[must_use]
pub fn corpus_path_for_project_root(root: &Path) -> PathBuf {
    root.join(".mcp-code-intelligence").join(CHUNK_CORPUS_FILE_NAME)
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    files: HashMap<String, Vec<CodeChunk>>,
}

/// The parsed-chunk cache itself. `set_file_chunks`/`purge_missing_files`
/// mutate in memory; nothing touches disk until [`Self::save`].
#[derive(Default)]
pub struct ChunkCorpus {
    files: HashMap<String, Vec<CodeChunk>>,
}

impl ChunkCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a corpus previously written by [`Self::save`]. A missing file
    /// is not an error at this layer — callers treat it as "start empty"
    /// (see [`corpus_path_for_project_root`]'s caller in the indexer).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let file: CorpusFile = serde_json::from_slice(&bytes)
            .map_err(|e| VectorStoreError::Corrupt(e.to_string()))?;
        Ok(Self { files: file.files })
    }

    /// Write-temp-then-rename, matching the store's own persistence
    /// discipline so a crash mid-write never corrupts the corpus.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = CorpusFile {
            files: self.files.clone(),
        };
        let body = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn set_file_chunks(&mut self, relative_path: impl Into<String>, chunks: Vec<CodeChunk>) {
        self.files.insert(relative_path.into(), chunks);
    }

    #[must_use]
    pub fn chunks_for_file(&self, relative_path: &str) -> Option<&[CodeChunk]> {
        self.files.get(relative_path).map(Vec::as_slice)
    }

    /// Drops every file not present in `live_files` (normalized relative
    /// paths), returning how many were removed.
    pub fn purge_missing_files(&mut self, live_files: &HashSet<String>) -> usize {
        let before = self.files.len();
        self.files.retain(|path, _| live_files.contains(path));
        before - self.files.len()
    }

    /// Every chunk currently known to the corpus, across all files. Used by
    /// callers that rebuild a project-wide derived structure wholesale
    /// (e.g. the relationship sidecar) rather than file-by-file.
    pub fn all_chunks(&self) -> impl Iterator<Item = &CodeChunk> {
        self.files.values().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::ChunkMetadata;

    fn chunk(path: &str) -> CodeChunk {
        CodeChunk::new(path.to_string(), 1, 2, "fn x() {}".to_string(), ChunkMetadata::default())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk_corpus.json");

        let mut corpus = ChunkCorpus::new();
        corpus.set_file_chunks("src/a.rs", vec![chunk("src/a.rs")]);
        corpus.save(&path).await.unwrap();

        let loaded = ChunkCorpus::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.chunks_for_file("src/a.rs").is_some());
    }

    #[test]
    fn purge_missing_files_drops_stale_entries() {
        let mut corpus = ChunkCorpus::new();
        corpus.set_file_chunks("src/a.rs", vec![chunk("src/a.rs")]);
        corpus.set_file_chunks("src/b.rs", vec![chunk("src/b.rs")]);

        let live: HashSet<String> = ["src/a.rs".to_string()].into_iter().collect();
        let removed = corpus.purge_missing_files(&live);

        assert_eq!(removed, 1);
        assert_eq!(corpus.len(), 1);
        assert!(corpus.chunks_for_file("src/b.rs").is_none());
    }
}
