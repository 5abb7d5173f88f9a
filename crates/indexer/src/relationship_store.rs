//! `<project>/.mcp-code-intelligence/relationships.json`: a thin sidecar
//! recording structural links between chunks (currently: "contains", derived
//! from the chunk hierarchy `Chunker` already resolves via
//! `parent_chunk_id`/`child_chunk_ids`). Rebuilt wholesale from the full
//! chunk corpus at the end of each indexing run, the same way
//! `directory_index.json` is, rather than incrementally patched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use context_code_chunker::CodeChunk;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const RELATIONSHIPS_FILE_NAME: &str = "relationships.json";

/// One structural edge between two chunks, keyed for two independent lookup
/// paths: by `content_hash` (survives a chunk's id changing across a
/// reindex as long as its content doesn't) and by `navigation_hint`
/// (`"path:line"`, what a caller with an editor location already has).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub key: String,
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    pub note: String,
    pub navigation_hint: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RelationshipFile {
    #[serde(default)]
    rows: Vec<RelationshipRow>,
}

/// Rows indexed both by `content_hash` and by `navigation_hint` for O(1)
/// lookup from either direction.
#[derive(Default)]
pub struct RelationshipStore {
    rows: Vec<RelationshipRow>,
    by_content_hash: HashMap<String, Vec<usize>>,
    by_navigation_hint: HashMap<String, Vec<usize>>,
}

impl RelationshipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn from_rows(rows: Vec<RelationshipRow>) -> Self {
        let mut store = Self { rows, ..Self::default() };
        store.reindex();
        store
    }

    fn reindex(&mut self) {
        self.by_content_hash.clear();
        self.by_navigation_hint.clear();
        for (i, row) in self.rows.iter().enumerate() {
            self.by_content_hash.entry(row.content_hash.clone()).or_default().push(i);
            self.by_navigation_hint.entry(row.navigation_hint.clone()).or_default().push(i);
        }
    }

    /// Loads a previously-saved sidecar. A missing or corrupt file degrades
    /// to an empty store rather than failing the run — relationships are
    /// optional, derived data, never load-bearing for indexing itself.
    pub async fn load(project_root: &Path) -> Self {
        let path = relationships_path(project_root);
        let rows = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<RelationshipFile>(&bytes)
                .map(|f| f.rows)
                .unwrap_or_else(|err| {
                    log::warn!("relationships.json at {} is corrupt ({err}); starting empty", path.display());
                    Vec::new()
                }),
            Err(_) => Vec::new(),
        };
        Self::from_rows(rows)
    }

    /// Atomic write-temp-then-rename, matching every other manifest this
    /// workspace persists.
    pub async fn save(&self, project_root: &Path) -> Result<()> {
        let path = relationships_path(project_root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = RelationshipFile { rows: self.rows.clone() };
        let body = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    #[must_use]
    pub fn rows_for_content_hash(&self, content_hash: &str) -> Vec<&RelationshipRow> {
        self.by_content_hash
            .get(content_hash)
            .map(|idxs| idxs.iter().map(|&i| &self.rows[i]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn rows_for_navigation_hint(&self, navigation_hint: &str) -> Vec<&RelationshipRow> {
        self.by_navigation_hint
            .get(navigation_hint)
            .map(|idxs| idxs.iter().map(|&i| &self.rows[i]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[must_use]
pub fn relationships_path(project_root: &Path) -> PathBuf {
    project_root.join(".mcp-code-intelligence").join(RELATIONSHIPS_FILE_NAME)
}

/// Rebuilds the full set of "contains" rows from the chunk hierarchy:
/// `parent_chunk_id`/`child_chunk_ids` is already resolved by the chunker
/// within a file, so this just walks that parent-pointer edge once per
/// chunk that has one. Self-contained, deterministic, safe to call with the
/// entire project's chunks on every run.
#[must_use]
pub fn build_relationships<'a>(chunks: impl IntoIterator<Item = &'a CodeChunk>) -> RelationshipStore {
    let chunks: Vec<&CodeChunk> = chunks.into_iter().collect();
    let by_id: HashMap<&str, &CodeChunk> =
        chunks.iter().map(|c| (c.chunk_id.as_str(), *c)).collect();

    let mut rows = Vec::new();
    for chunk in &chunks {
        let Some(parent_id) = chunk.metadata.parent_chunk_id.as_deref() else {
            continue;
        };
        let Some(parent) = by_id.get(parent_id) else {
            continue;
        };
        rows.push(RelationshipRow {
            key: format!("{parent_id}->{}", chunk.chunk_id),
            source: parent_id.to_string(),
            target: chunk.chunk_id.clone(),
            relationship_type: "contains".to_string(),
            note: format!("{} contains {}", parent.breadcrumb(), chunk.breadcrumb()),
            navigation_hint: chunk.navigation_hint(),
            content_hash: chunk.content_hash.clone(),
        });
    }

    RelationshipStore::from_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::{ChunkMetadata, ChunkType};

    fn chunk(path: &str, start: usize, end: usize, parent: Option<&str>) -> CodeChunk {
        let mut metadata = ChunkMetadata::default().chunk_type(ChunkType::Method);
        metadata.parent_chunk_id = parent.map(str::to_string);
        CodeChunk::new(path.to_string(), start, end, "fn body() {}".to_string(), metadata)
    }

    #[test]
    fn builds_contains_row_between_parent_and_child() {
        let parent = chunk("src/a.rs", 1, 20, None);
        let child = chunk("src/a.rs", 2, 10, Some(&parent.chunk_id));

        let store = build_relationships([&parent, &child]);
        assert_eq!(store.len(), 1);

        let rows = store.rows_for_content_hash(&child.content_hash);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, parent.chunk_id);
        assert_eq!(rows[0].target, child.chunk_id);
        assert_eq!(rows[0].relationship_type, "contains");
    }

    #[test]
    fn chunk_with_no_parent_produces_no_row() {
        let orphan = chunk("src/a.rs", 1, 5, None);
        let store = build_relationships([&orphan]);
        assert!(store.is_empty());
    }

    #[test]
    fn dangling_parent_id_is_skipped() {
        let child = chunk("src/a.rs", 2, 10, Some("missing-parent-id"));
        let store = build_relationships([&child]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let parent = chunk("src/a.rs", 1, 20, None);
        let child = chunk("src/a.rs", 2, 10, Some(&parent.chunk_id));

        let store = build_relationships([&parent, &child]);
        store.save(dir.path()).await.unwrap();

        let reloaded = RelationshipStore::load(dir.path()).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.rows_for_navigation_hint(&child.navigation_hint()).len(), 1);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RelationshipStore::load(dir.path()).await;
        assert!(store.is_empty());
    }
}
