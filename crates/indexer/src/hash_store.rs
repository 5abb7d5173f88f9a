//! `<project>/.mcp-code-intelligence/index_metadata.json`, the single source of
//! truth for "has this file been indexed at this version?". `needs_reindex`
//! is the fast-skip gate every incremental `index_project` run consults
//! before hashing or re-embedding a file: `mtime` alone is a cheap
//! short-circuit, never a substitute for the content hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, Result};

const MANIFEST_FILE_NAME: &str = "index_metadata.json";
const CURRENT_INDEX_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub mtime: f64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    index_version: String,
    indexed_at: String,
    file_metadata: HashMap<String, FileRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            index_version: CURRENT_INDEX_VERSION.to_string(),
            indexed_at: chrono::Utc::now().to_rfc3339(),
            file_metadata: HashMap::new(),
        }
    }
}

/// Content hashes + mtimes; decides "needs reindex" for a file.
/// Keyed by a path string the caller chooses to treat as stable (this
/// workspace keys by project-relative path rather than an absolute path,
/// since the manifest travels with the project directory).
pub struct HashStore {
    manifest_path: PathBuf,
    manifest: Manifest,
}

impl HashStore {
    /// An empty manifest rooted at `project_root`, without touching disk. Used
    /// for a full rebuild, where whatever is currently on disk is irrelevant.
    #[must_use]
    pub fn empty(project_root: &Path) -> Self {
        Self {
            manifest_path: manifest_path(project_root),
            manifest: Manifest::default(),
        }
    }

    /// Loads the manifest at `project_root/.mcp-code-intelligence/index_metadata.json`,
    /// or starts empty if it doesn't exist or fails to parse (a corrupt
    /// manifest degrades to "reindex everything" rather than failing the run).
    pub async fn load(project_root: &Path) -> Self {
        let manifest_path = manifest_path(project_root);
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!(
                    "index_metadata.json at {} is corrupt ({err}); starting a fresh manifest",
                    manifest_path.display()
                );
                Manifest::default()
            }),
            Err(_) => Manifest::default(),
        };
        Self { manifest_path, manifest }
    }

    /// `needs_reindex(path)`: true if the path is absent from the manifest,
    /// or if `mtime > stored.mtime` AND the content hash differs. mtime
    /// alone never suffices — if `mtime <= stored.mtime` we skip without
    /// hashing at all (the fast-skip optimization this manifest exists for).
    #[must_use]
    pub fn needs_reindex(&self, rel_path: &str, mtime: f64, content: &str) -> bool {
        match self.manifest.file_metadata.get(rel_path) {
            None => true,
            Some(record) => {
                if mtime <= record.mtime {
                    return false;
                }
                hash_file_content(content) != record.hash
            }
        }
    }

    pub fn record(&mut self, rel_path: impl Into<String>, mtime: f64, content: &str) {
        self.manifest.file_metadata.insert(
            rel_path.into(),
            FileRecord {
                mtime,
                hash: hash_file_content(content),
            },
        );
    }

    /// Drops entries for files no longer present (deleted/renamed).
    pub fn retain_live(&mut self, live_rel_paths: &std::collections::HashSet<String>) {
        self.manifest
            .file_metadata
            .retain(|path, _| live_rel_paths.contains(path));
    }

    #[must_use]
    pub fn contains(&self, rel_path: &str) -> bool {
        self.manifest.file_metadata.contains_key(rel_path)
    }

    /// The stored record for `rel_path`, if any. Used to revert a file's
    /// entry to its pre-run state when this run's parse of it failed (the
    /// spec's "HashStore entry not updated for failed files" rule).
    #[must_use]
    pub fn get(&self, rel_path: &str) -> Option<&FileRecord> {
        self.manifest.file_metadata.get(rel_path)
    }

    /// Drops `rel_path`'s entry outright (used when a file fails this run
    /// and had no prior record to revert to).
    pub fn remove(&mut self, rel_path: &str) {
        self.manifest.file_metadata.remove(rel_path);
    }

    /// A clone of every currently-stored record, taken before a run starts
    /// overwriting entries, so a file that fails to parse this run can have
    /// its pre-run record restored afterward instead of a derived one.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, FileRecord> {
        self.manifest.file_metadata.clone()
    }

    /// Sets `rel_path`'s record directly (no hashing), used to restore a
    /// pre-run snapshot entry verbatim.
    pub fn set_record(&mut self, rel_path: impl Into<String>, record: FileRecord) {
        self.manifest.file_metadata.insert(rel_path.into(), record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.manifest.file_metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifest.file_metadata.is_empty()
    }

    /// Atomic write-temp-then-rename, matching every other manifest this
    /// workspace persists (health snapshot, directory index, watermark).
    pub async fn save(&mut self) -> Result<()> {
        self.manifest.indexed_at = chrono::Utc::now().to_rfc3339();
        if let Some(parent) = self.manifest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&self.manifest)?;
        let tmp = self.manifest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.manifest_path).await?;
        Ok(())
    }
}

#[must_use]
fn manifest_path(project_root: &Path) -> PathBuf {
    project_root.join(".mcp-code-intelligence").join(MANIFEST_FILE_NAME)
}

/// `md5(content)`, matching the manifest schema's `hash` field (distinct
/// from `CodeChunk::content_hash`, which is free to use any stable
/// algorithm for chunk-level hashing).
#[must_use]
pub fn hash_file_content(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stale-lock recovery at startup: delete leftover
/// `-journal`/`-wal`/`-shm` sidecars next to the vector store database, if
/// present. Best-effort; a missing sidecar is not an error.
pub async fn clean_stale_db_sidecars(store_path: &Path) {
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut sidecar = store_path.as_os_str().to_os_string();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            if let Err(err) = tokio::fs::remove_file(&sidecar).await {
                log::warn!("failed to remove stale db sidecar {}: {err}", sidecar.display());
            } else {
                log::info!("removed stale db sidecar {}", sidecar.display());
            }
        }
    }
}

/// Helper so a caller without a `HashStore` handy can still fail loudly on
/// a missing project.
pub fn require_project_root(root: &Path) -> Result<()> {
    if root.exists() {
        Ok(())
    } else {
        Err(IndexerError::InvalidPath(format!(
            "Path does not exist: {}",
            root.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn unknown_file_needs_reindex() {
        let dir = TempDir::new().unwrap();
        let store = HashStore::load(dir.path()).await;
        assert!(store.needs_reindex("src/a.rs", 1.0, "fn a() {}"));
    }

    #[tokio::test]
    async fn unchanged_mtime_skips_without_hashing() {
        let dir = TempDir::new().unwrap();
        let mut store = HashStore::load(dir.path()).await;
        store.record("src/a.rs", 100.0, "fn a() {}");
        // Even though content differs, mtime <= stored.mtime short-circuits.
        assert!(!store.needs_reindex("src/a.rs", 100.0, "totally different content"));
    }

    #[tokio::test]
    async fn newer_mtime_with_same_hash_does_not_need_reindex() {
        let dir = TempDir::new().unwrap();
        let mut store = HashStore::load(dir.path()).await;
        store.record("src/a.rs", 100.0, "fn a() {}");
        assert!(!store.needs_reindex("src/a.rs", 200.0, "fn a() {}"));
    }

    #[tokio::test]
    async fn newer_mtime_with_changed_hash_needs_reindex() {
        let dir = TempDir::new().unwrap();
        let mut store = HashStore::load(dir.path()).await;
        store.record("src/a.rs", 100.0, "fn a() {}");
        assert!(store.needs_reindex("src/a.rs", 200.0, "fn a() { return 1; }"));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut store = HashStore::load(dir.path()).await;
        store.record("src/a.rs", 100.0, "fn a() {}");
        store.save().await.unwrap();

        let reloaded = HashStore::load(dir.path()).await;
        assert!(reloaded.contains("src/a.rs"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn retain_live_drops_deleted_files() {
        let dir = TempDir::new().unwrap();
        let mut store = HashStore::load(dir.path()).await;
        store.record("src/a.rs", 1.0, "a");
        store.record("src/b.rs", 1.0, "b");

        let live: std::collections::HashSet<String> = ["src/a.rs".to_string()].into_iter().collect();
        store.retain_live(&live);
        assert!(store.contains("src/a.rs"));
        assert!(!store.contains("src/b.rs"));
    }

    #[tokio::test]
    async fn corrupt_manifest_degrades_to_fresh_start() {
        let dir = TempDir::new().unwrap();
        let manifest_dir = dir.path().join(".mcp-code-intelligence");
        tokio::fs::create_dir_all(&manifest_dir).await.unwrap();
        tokio::fs::write(manifest_dir.join("index_metadata.json"), b"not json")
            .await
            .unwrap();

        let store = HashStore::load(dir.path()).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn clean_stale_db_sidecars_removes_leftovers() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("index.db");
        tokio::fs::write(&db_path, b"db").await.unwrap();
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut p = db_path.as_os_str().to_os_string();
            p.push(suffix);
            tokio::fs::write(PathBuf::from(p), b"x").await.unwrap();
        }

        clean_stale_db_sidecars(&db_path).await;

        for suffix in ["-journal", "-wal", "-shm"] {
            let mut p = db_path.as_os_str().to_os_string();
            p.push(suffix);
            assert!(!PathBuf::from(p).exists());
        }
    }
}
