//! Directory aggregate rebuild: `directory_index.json` holds
//! `dir -> {total_files, total_chunks, last_modified}` for every directory
//! that contains at least one successfully indexed file. Rebuilt wholesale
//! at the end of each `index_project` run from the set of files that run
//! touched — callers that want finer-grained incremental maintenance can
//! diff the old file against the new one themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DIRECTORY_INDEX_FILE_NAME: &str = "directory_index.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectoryAggregate {
    pub total_files: usize,
    pub total_chunks: usize,
    pub last_modified: String,
}

/// One row per successfully indexed file: its project-relative path, how
/// many chunks it produced, and its last-modified timestamp (RFC3339, so
/// lexical and chronological ordering agree).
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub relative_path: String,
    pub chunk_count: usize,
    pub last_modified: String,
}

/// Rebuild the full `dir -> aggregate` map from `indexed_files`. A file's
/// own directory and every ancestor directory above it both accumulate its
/// counts, so `src/db/pool.rs` contributes to both `src` and `src/db`. A
/// root-level file (no directory component) contributes to no bucket —
/// there is deliberately no "." entry.
#[must_use]
pub fn build_directory_index(indexed_files: &[IndexedFile]) -> HashMap<String, DirectoryAggregate> {
    let mut index: HashMap<String, DirectoryAggregate> = HashMap::new();

    for file in indexed_files {
        for dir in ancestor_dirs(&file.relative_path) {
            let entry = index.entry(dir).or_default();
            entry.total_files += 1;
            entry.total_chunks += file.chunk_count;
            if file.last_modified.as_str() > entry.last_modified.as_str() {
                entry.last_modified.clone_from(&file.last_modified);
            }
        }
    }

    index
}

fn ancestor_dirs(relative_path: &str) -> Vec<String> {
    let path = Path::new(relative_path);
    let mut components: Vec<_> = path.components().collect();
    components.pop(); // drop the filename itself

    let mut dirs = Vec::with_capacity(components.len());
    let mut current = PathBuf::new();
    for component in components {
        current.push(component);
        dirs.push(current.to_string_lossy().replace('\\', "/"));
    }
    dirs
}

#[must_use]
pub fn directory_index_path(project_root: &Path) -> PathBuf {
    project_root.join(".mcp-code-intelligence").join(DIRECTORY_INDEX_FILE_NAME)
}

/// Atomic write-temp-then-rename, matching every other manifest this
/// workspace persists.
pub async fn save_directory_index(
    project_root: &Path,
    index: &HashMap<String, DirectoryAggregate>,
) -> Result<()> {
    let path = directory_index_path(project_root);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(index)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, chunks: usize, modified: &str) -> IndexedFile {
        IndexedFile {
            relative_path: path.to_string(),
            chunk_count: chunks,
            last_modified: modified.to_string(),
        }
    }

    #[test]
    fn aggregates_nested_directories() {
        let files = vec![
            file("src/db/pool.rs", 3, "2026-01-01T00:00:00Z"),
            file("src/db/query.rs", 2, "2026-01-02T00:00:00Z"),
            file("README.md", 1, "2025-12-01T00:00:00Z"),
        ];
        let index = build_directory_index(&files);

        let src = index.get("src").unwrap();
        assert_eq!(src.total_files, 2);
        assert_eq!(src.total_chunks, 5);
        assert_eq!(src.last_modified, "2026-01-02T00:00:00Z");

        let src_db = index.get("src/db").unwrap();
        assert_eq!(src_db.total_files, 2);
        assert_eq!(src_db.total_chunks, 5);

        assert!(!index.contains_key("README.md"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn empty_input_yields_empty_index() {
        let index = build_directory_index(&[]);
        assert!(index.is_empty());
    }
}
