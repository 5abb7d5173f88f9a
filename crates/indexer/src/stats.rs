//! Per-run indexing statistics: how many files/chunks were processed during
//! one `index_project` (or `index_models`) call, how long it took, and which
//! files failed. Distinct from `context_vector_store::IndexStats` (the
//! store's aggregate view of everything it holds) — this is scoped to a
//! single run and feeds the end-of-run `{indexed, failed, skipped}` summary
//! and the watcher's health snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub time_ms: u64,
    pub languages: HashMap<String, usize>,
    pub errors: Vec<String>,
}

impl IndexStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, language: &str, _lines: usize) {
        self.files += 1;
        *self.languages.entry(language.to_string()).or_insert(0) += 1;
    }

    pub fn add_chunks(&mut self, count: usize) {
        self.chunks += count;
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    /// Summary line for `indexing_errors.log` / CLI-layer reporting:
    /// `{indexed, failed, skipped}`.
    #[must_use]
    pub fn summary(&self, skipped: usize) -> String {
        format!(
            "{{indexed: {}, failed: {}, skipped: {}}}",
            self.files,
            self.failed(),
            skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_files_chunks_and_errors() {
        let mut stats = IndexStats::new();
        stats.add_file("rust", 10);
        stats.add_file("python", 20);
        stats.add_chunks(3);
        stats.add_error("parse failed: foo.py");

        assert_eq!(stats.files, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.languages.get("rust"), Some(&1));
        assert_eq!(stats.summary(5), "{indexed: 2, failed: 1, skipped: 5}");
    }
}
