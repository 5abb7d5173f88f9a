//! Watcher health snapshot, persisted under the project's `.mcp-code-intelligence`
//! directory so `get_project_status`-style tool calls (out of scope here,
//! consumed by the RPC layer) can read the last indexing outcome without
//! holding a live handle to the `StreamingIndexer`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stats::IndexStats;

const HEALTH_FILE_NAME: &str = "health.json";
const ERRORS_LOG_FILE_NAME: &str = "indexing_errors.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub updated_at: String,
    pub reason: String,
    pub success: bool,
    pub files: usize,
    pub chunks: usize,
    pub failed: usize,
    pub time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_events: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[must_use]
pub fn health_file_path(project_root: &Path) -> PathBuf {
    project_root.join(".mcp-code-intelligence").join(HEALTH_FILE_NAME)
}

fn errors_log_path(project_root: &Path) -> PathBuf {
    project_root.join(".mcp-code-intelligence").join(ERRORS_LOG_FILE_NAME)
}

/// Appends a run-start banner to `indexing_errors.log` so the log reads as a
/// sequence of runs rather than an undifferentiated stream of error lines.
pub async fn log_run_start(project_root: &Path, tool_version: &str) -> Result<()> {
    let banner = format!(
        "========\n[{}] Indexing run started - {tool_version}\n========\n",
        Utc::now().to_rfc3339()
    );
    append_log(project_root, &banner).await
}

/// Persist a successful (or attempted) run's stats as the current health
/// snapshot, atomically (write-temp-then-rename, matching the HashStore
/// manifest's persistence discipline).
pub async fn write_health_snapshot(
    project_root: &Path,
    stats: &IndexStats,
    reason: &str,
    p95_duration_ms: Option<u64>,
    pending_events: Option<usize>,
) -> Result<()> {
    let snapshot = HealthSnapshot {
        updated_at: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        success: true,
        files: stats.files,
        chunks: stats.chunks,
        failed: stats.failed(),
        time_ms: stats.time_ms,
        p95_duration_ms,
        pending_events,
        last_error: None,
    };
    persist(project_root, &snapshot).await?;

    if stats.failed() > 0 {
        let mut lines = String::new();
        for err in &stats.errors {
            lines.push_str(&format!("[{}] {err}\n", snapshot.updated_at));
        }
        append_log(project_root, &lines).await?;
    }
    Ok(())
}

/// Persist a failed run. Distinct from [`write_health_snapshot`] since a
/// failed cycle never produced a complete `IndexStats` to report counts
/// from — only the failure reason and error text are known.
pub async fn append_failure_reason(
    project_root: &Path,
    reason: &str,
    error: &str,
    p95_duration_ms: Option<u64>,
) -> Result<()> {
    let updated_at = Utc::now().to_rfc3339();
    let snapshot = HealthSnapshot {
        updated_at: updated_at.clone(),
        reason: reason.to_string(),
        success: false,
        files: 0,
        chunks: 0,
        failed: 0,
        time_ms: 0,
        p95_duration_ms,
        pending_events: None,
        last_error: Some(error.to_string()),
    };
    persist(project_root, &snapshot).await?;
    append_log(project_root, &format!("[{updated_at}] {reason}: {error}\n")).await?;
    Ok(())
}

pub async fn read_health_snapshot(project_root: &Path) -> Result<Option<HealthSnapshot>> {
    let path = health_file_path(project_root);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn persist(project_root: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    let path = health_file_path(project_root);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn append_log(project_root: &Path, line: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let path = errors_log_path(project_root);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut stats = IndexStats::new();
        stats.add_file("rust", 10);
        stats.add_chunks(2);

        write_health_snapshot(dir.path(), &stats, "fs_event", Some(120), Some(0))
            .await
            .unwrap();

        let snapshot = read_health_snapshot(dir.path()).await.unwrap().unwrap();
        assert!(snapshot.success);
        assert_eq!(snapshot.files, 1);
        assert_eq!(snapshot.chunks, 2);
        assert_eq!(snapshot.reason, "fs_event");
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_health_snapshot(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_appends_to_errors_log() {
        let dir = TempDir::new().unwrap();
        append_failure_reason(dir.path(), "fs_event", "boom", None)
            .await
            .unwrap();

        let log = tokio::fs::read_to_string(errors_log_path(dir.path())).await.unwrap();
        assert!(log.contains("boom"));

        let snapshot = read_health_snapshot(dir.path()).await.unwrap().unwrap();
        assert!(!snapshot.success);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
    }
}
