//! Project configuration: `<project>/.mcp/mcp.json`, parsed with
//! `serde`/`serde_json` into a typed struct with `#[serde(default)]` on
//! every tunable field so a config file that sets only one key (or no
//! config file at all) still yields sane defaults for the rest.
//!
//! This is the core's own copy of the config surface — the CLI-layer
//! onboarding wizard that writes `.mcp/mcp.json` in the first place is out
//! of scope here, but the core still has to read whatever is there.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const CONFIG_RELATIVE_PATH: &str = ".mcp/mcp.json";

fn default_similarity_threshold() -> f32 {
    0.30
}
fn default_max_workers() -> usize {
    4
}
fn default_batch_size() -> usize {
    8
}
fn default_embedding_batch_size() -> usize {
    32
}
fn default_onnx_num_threads() -> usize {
    default_thread_budget()
}
fn default_throttle_delay_ms() -> u64 {
    0
}
fn default_max_file_size_kb() -> u64 {
    10 * 1024
}

fn default_thread_budget() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(4)
}

/// `.mcp/mcp.json`'s recognized keys. Unknown keys in the
/// file are ignored rather than rejected, so a deployment can carry
/// collaborator-only keys (e.g. RPC transport settings) alongside the ones
/// the core reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub file_extensions: Vec<String>,
    pub embedding_model: String,
    pub reranker_model: Option<String>,
    pub similarity_threshold: f32,
    pub max_workers: usize,
    pub batch_size: usize,
    pub embedding_batch_size: usize,
    pub onnx_num_threads: usize,
    pub throttle_delay_ms: u64,
    pub max_file_size_kb: u64,
    pub index_important_only: bool,
    pub enable_guardian: bool,
    pub enable_logic_check: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            file_extensions: Vec::new(),
            embedding_model: "bge-small".to_string(),
            reranker_model: None,
            similarity_threshold: default_similarity_threshold(),
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            embedding_batch_size: default_embedding_batch_size(),
            onnx_num_threads: default_onnx_num_threads(),
            throttle_delay_ms: default_throttle_delay_ms(),
            max_file_size_kb: default_max_file_size_kb(),
            index_important_only: false,
            enable_guardian: false,
            enable_logic_check: false,
        }
    }
}

impl ProjectConfig {
    #[must_use]
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_RELATIVE_PATH)
    }

    /// Loads `<project_root>/.mcp/mcp.json`. A missing file yields
    /// [`ProjectConfig::default`]; a present-but-unparseable file logs a
    /// warning and also degrades to defaults — a malformed config must
    /// never fail indexing or search outright.
    pub async fn load(project_root: &Path) -> Self {
        let path = Self::config_path(project_root);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Self>(&bytes) {
                Ok(config) => config,
                Err(err) => {
                    log::warn!("{} is not valid JSON ({err}); using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Writes `config` to `<project_root>/.mcp/mcp.json`, atomically
    /// (write-temp-then-rename). Exposed mainly for tests and for a
    /// collaborator that wants to persist a config it constructed
    /// programmatically; the onboarding flow that normally authors this
    /// file is out of scope here.
    pub async fn save(&self, project_root: &Path) -> Result<()> {
        let path = Self::config_path(project_root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Extension allow-list this config implies; an empty `file_extensions`
    /// list means "use the scanner's own broad default" rather than "index
    /// nothing".
    #[must_use]
    pub fn extensions_override(&self) -> Option<&[String]> {
        if self.file_extensions.is_empty() {
            None
        } else {
            Some(&self.file_extensions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_config_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::load(dir.path()).await;
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.similarity_threshold, 0.30);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.max_file_size_kb, 10240);
    }

    #[tokio::test]
    async fn partial_config_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".mcp");
        tokio::fs::create_dir_all(&config_dir).await.unwrap();
        tokio::fs::write(config_dir.join("mcp.json"), br#"{"batch_size": 16}"#)
            .await
            .unwrap();

        let config = ProjectConfig::load(dir.path()).await;
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.similarity_threshold, 0.30);
    }

    #[tokio::test]
    async fn corrupt_config_degrades_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".mcp");
        tokio::fs::create_dir_all(&config_dir).await.unwrap();
        tokio::fs::write(config_dir.join("mcp.json"), b"not json")
            .await
            .unwrap();

        let config = ProjectConfig::load(dir.path()).await;
        assert_eq!(config, ProjectConfig::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut config = ProjectConfig::default();
        config.batch_size = 4;
        config.reranker_model = Some("bge-reranker-base".to_string());
        config.save(dir.path()).await.unwrap();

        let reloaded = ProjectConfig::load(dir.path()).await;
        assert_eq!(reloaded, config);
    }

    #[test]
    fn empty_extensions_means_no_override() {
        let config = ProjectConfig::default();
        assert!(config.extensions_override().is_none());
    }
}
