//! RagGuard: a pluggable policy sitting at the tail of the query pipeline.
//! Three responsibilities:
//!
//! - **scope filter**: drop results outside query-implied directories when
//!   the query carries a path-shaped hint (e.g. `"auth/login error"` implies
//!   the `auth/` directory).
//! - **penalties**: down-weight low-signal chunks (too short, boilerplate).
//! - **active files**: the set of recently-changed files used by the query
//!   pipeline's recency boost.
//!
//! The "low-signal" predicate is deliberately a trait object rather than a
//! fixed rule, so a caller can supply a configurable policy.
//! [`DefaultLowSignalPredicate`] is the out-of-the-box choice; callers with
//! project-specific boilerplate can supply their own.

use std::collections::HashSet;
use std::sync::RwLock;

use context_vector_store::SearchResult;

/// Classifies a chunk's content as "low signal": short enough, or
/// boilerplate enough, that it shouldn't rank alongside substantive hits.
pub trait LowSignalPredicate: Send + Sync {
    fn is_low_signal(&self, content: &str) -> bool;
}

const BOILERPLATE_PATTERNS: &[&str] = &[
    "auto-generated",
    "autogenerated",
    "do not edit",
    "this file is generated",
    "code generated by",
];

/// Default heuristic: fewer than `min_tokens` whitespace-separated tokens,
/// or a match against a small built-in boilerplate-comment pattern set.
pub struct DefaultLowSignalPredicate {
    pub min_tokens: usize,
}

impl Default for DefaultLowSignalPredicate {
    fn default() -> Self {
        Self { min_tokens: 20 }
    }
}

impl LowSignalPredicate for DefaultLowSignalPredicate {
    fn is_low_signal(&self, content: &str) -> bool {
        let token_count = content.split_whitespace().count();
        if token_count < self.min_tokens {
            return true;
        }
        let lower = content.to_ascii_lowercase();
        BOILERPLATE_PATTERNS.iter().any(|p| lower.contains(p))
    }
}

/// Scope filter, low-signal penalty, active-files tracking.
pub struct RagGuard {
    active_files: RwLock<HashSet<String>>,
    low_signal: Box<dyn LowSignalPredicate>,
    low_signal_penalty: f32,
}

impl RagGuard {
    #[must_use]
    pub fn new(low_signal: Box<dyn LowSignalPredicate>, low_signal_penalty: f32) -> Self {
        Self {
            active_files: RwLock::new(HashSet::new()),
            low_signal,
            low_signal_penalty: low_signal_penalty.clamp(0.0, 1.0),
        }
    }

    /// Default policy: 20-token floor, 0.5x penalty multiplier.
    #[must_use]
    pub fn default_policy() -> Self {
        Self::new(Box::new(DefaultLowSignalPredicate::default()), 0.5)
    }

    /// Replace the tracked "active files" set (normally git's changed-files
    /// set, refreshed once per query).
    pub fn set_active_files(&self, files: HashSet<String>) {
        *self.active_files.write().unwrap() = files;
    }

    #[must_use]
    pub fn is_active_file(&self, path: &str) -> bool {
        self.active_files.read().unwrap().contains(path)
    }

    #[must_use]
    pub fn active_file_count(&self) -> usize {
        self.active_files.read().unwrap().len()
    }

    /// Scope filter: if the query carries a directory hint (a token
    /// containing `/`), keep only results whose file path contains that
    /// hint; otherwise the full set passes through unchanged. If applying
    /// the hint would empty the result set, the hint is dropped rather than
    /// returning nothing — a loose hint degrading to no-op is preferable to
    /// silently erasing an otherwise-good hit.
    #[must_use]
    pub fn scope_filter(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let Some(hint) = extract_scope_hint(query) else {
            return results;
        };

        let filtered: Vec<SearchResult> = results
            .iter()
            .filter(|r| r.chunk.file_path.replace('\\', "/").to_ascii_lowercase().contains(&hint))
            .cloned()
            .collect();

        if filtered.is_empty() {
            results
        } else {
            filtered
        }
    }

    /// Multiplies the score of any low-signal result by the configured
    /// penalty. Never drops a result outright — penalties lower rank, they
    /// don't censor.
    #[must_use]
    pub fn apply_penalties(&self, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        for result in &mut results {
            if self.low_signal.is_low_signal(&result.chunk.content) {
                result.similarity_score *= self.low_signal_penalty;
            }
        }
        results
    }
}

/// Looks for a path-shaped token (contains `/`, not purely punctuation) in
/// the query and returns it lowercased, stripped of a trailing slash. Used
/// as the scope-filter hint. Returns `None` when no such token exists.
fn extract_scope_hint(query: &str) -> Option<String> {
    query
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| c == ',' || c == '.' || c == ':' || c == ';'))
        .find(|tok| tok.contains('/') && tok.chars().any(char::is_alphanumeric))
        .map(|tok| tok.trim_end_matches('/').to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_code_chunker::{ChunkMetadata, CodeChunk};

    fn result(path: &str, content: &str, score: f32) -> SearchResult {
        let chunk = CodeChunk::new(path.to_string(), 1, 5, content.to_string(), ChunkMetadata::default());
        SearchResult::from_chunk(chunk, score, 0)
    }

    #[test]
    fn scope_filter_keeps_only_hinted_directory() {
        let guard = RagGuard::default_policy();
        let results = vec![
            result("src/auth/login.rs", "fn login() {}", 0.9),
            result("src/db/pool.rs", "fn connect() {}", 0.95),
        ];
        let filtered = guard.scope_filter("auth/login bug", results);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.file_path, "src/auth/login.rs");
    }

    #[test]
    fn scope_filter_is_noop_without_a_hint() {
        let guard = RagGuard::default_policy();
        let results = vec![result("src/db/pool.rs", "fn connect() {}", 0.95)];
        let filtered = guard.scope_filter("how does connection pooling work", results);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn scope_filter_falls_back_when_hint_matches_nothing() {
        let guard = RagGuard::default_policy();
        let results = vec![result("src/db/pool.rs", "fn connect() {}", 0.95)];
        let filtered = guard.scope_filter("payments/refund logic", results);
        assert_eq!(filtered.len(), 1, "an unmatched hint should not erase the result set");
    }

    #[test]
    fn low_signal_content_is_penalized_not_dropped() {
        let guard = RagGuard::default_policy();
        let results = vec![result("src/a.rs", "x", 0.8)];
        let penalized = guard.apply_penalties(results);
        assert_eq!(penalized.len(), 1);
        assert!(penalized[0].similarity_score < 0.8);
    }

    #[test]
    fn substantial_content_is_untouched() {
        let guard = RagGuard::default_policy();
        let long_content = "fn helper(a: i32, b: i32) -> i32 { a.checked_add(b).unwrap_or(i32::MAX) }";
        let results = vec![result("src/a.rs", long_content, 0.8)];
        let penalized = guard.apply_penalties(results);
        assert_eq!(penalized[0].similarity_score, 0.8);
    }

    #[test]
    fn active_files_round_trip() {
        let guard = RagGuard::default_policy();
        assert!(!guard.is_active_file("src/a.rs"));
        guard.set_active_files(["src/a.rs".to_string()].into_iter().collect());
        assert!(guard.is_active_file("src/a.rs"));
        assert_eq!(guard.active_file_count(), 1);
    }
}
