//! Tunable knobs a deployment can vary per search surface (CLI default vs.
//! an IDE plugin vs. a CI bot) without forking the pipeline: similarity
//! thresholds, which paths to reject or down-weight, rerank/BM25 toggles.

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Adaptive similarity threshold: short queries relax the floor, long
/// queries raise the ceiling, everything else uses `base`.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub base: f32,
    pub short_query_floor: f32,
    pub long_query_ceiling: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            base: 0.30,
            short_query_floor: 0.15,
            long_query_ceiling: 0.60,
        }
    }
}

impl Thresholds {
    /// `len(query) < 20 → max(floor, base - 0.05)`; `len(query) > 200 →
    /// min(ceiling, base + 0.10)`; else `base`.
    #[must_use]
    pub fn adaptive(&self, query: &str) -> f32 {
        let len = query.chars().count();
        if len < 20 {
            self.short_query_floor.max(self.base - 0.05)
        } else if len > 200 {
            self.long_query_ceiling.min(self.base + 0.10)
        } else {
            self.base
        }
    }
}

/// Optional hybrid text-index scoring: off by default, additive to the
/// vector score when enabled, never a replacement for it.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Config {
    pub enabled: bool,
    pub weight: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: 0.2,
        }
    }
}

/// How the reranker should be configured; `model_id: None` means
/// "no reranker configured" and every `rerank` call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RerankConfig {
    pub model_id: Option<String>,
    pub top_n: usize,
}

impl RerankConfig {
    #[must_use]
    pub fn none() -> Self {
        Self {
            model_id: None,
            top_n: 50,
        }
    }

    #[must_use]
    pub fn with_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            top_n: 50,
        }
    }
}

/// How a fuzzy/text hit matched, used to prioritize exact symbol hits over
/// loose substring matches when fusing with semantic scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    ExactSymbol,
    PrefixSymbol,
    Fuzzy,
    None,
}

/// Per-surface search configuration: which paths are rejected outright,
/// which are down/up-weighted, and the thresholds/rerank/BM25 knobs that
/// apply. Constructed once per pipeline instance and shared read-only
/// across queries.
#[derive(Clone)]
pub struct SearchProfile {
    name: String,
    rejected: GlobSet,
    downweighted: GlobSet,
    upweighted: GlobSet,
    min_fuzzy_score: f32,
    pub thresholds: Thresholds,
    pub rerank: RerankConfig,
    pub bm25: Bm25Config,
}

const DEFAULT_REJECTED: &[&str] = &[
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.git/**",
    "**/vendor/**",
];
const DEFAULT_DOWNWEIGHTED: &[&str] = &[
    "**/tests/**",
    "**/test/**",
    "**/agents/**",
    "**/scripts/**",
    "**/docker/**",
    "**/db/**",
    "**/deploy/**",
    "**/infra/**",
];
const DEFAULT_UPWEIGHTED: &[&str] = &["**/utils/**", "**/src/lib.rs", "**/lib/**"];

impl SearchProfile {
    fn build_globset(patterns: &[&str]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }

    /// General-purpose profile: the defaults every caller gets unless it
    /// builds a custom one.
    #[must_use]
    pub fn general() -> Self {
        Self {
            name: "general".to_string(),
            rejected: Self::build_globset(DEFAULT_REJECTED),
            downweighted: Self::build_globset(DEFAULT_DOWNWEIGHTED),
            upweighted: Self::build_globset(DEFAULT_UPWEIGHTED),
            min_fuzzy_score: 0.05,
            thresholds: Thresholds::default(),
            rerank: RerankConfig::none(),
            bm25: Bm25Config::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_rerank(mut self, rerank: RerankConfig) -> Self {
        self.rerank = rerank;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Paths under a build/vendor/VCS directory never surface at all.
    #[must_use]
    pub fn is_rejected(&self, file_path: &str) -> bool {
        self.rejected.is_match(file_path)
    }

    #[must_use]
    pub fn min_fuzzy_score(&self) -> f32 {
        self.min_fuzzy_score
    }

    /// Multiplicative weight applied to a result's score based on its path:
    /// tests/scripts/infra are down-weighted, library/util code is
    /// up-weighted, everything else is neutral.
    #[must_use]
    pub fn path_weight(&self, file_path: &str) -> f32 {
        let lower = file_path.to_ascii_lowercase();
        let mut weight = 1.0;
        if self.downweighted.is_match(&lower) {
            weight *= 0.65;
        }
        if self.upweighted.is_match(&lower) {
            weight *= 1.2;
        }
        weight
    }

    #[must_use]
    pub fn adaptive_threshold(&self, query: &str) -> f32 {
        self.thresholds.adaptive(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_build_directories() {
        let profile = SearchProfile::general();
        assert!(profile.is_rejected("project/node_modules/left-pad/index.js"));
        assert!(profile.is_rejected("target/debug/build/foo.rs"));
        assert!(!profile.is_rejected("src/main.rs"));
    }

    #[test]
    fn downweights_test_paths_and_upweights_utils() {
        let profile = SearchProfile::general();
        assert!(profile.path_weight("src/tests/foo.rs") < 1.0);
        assert!(profile.path_weight("src/utils/helpers.rs") > 1.0);
        assert_eq!(profile.path_weight("src/main.rs"), 1.0);
    }

    #[test]
    fn adaptive_threshold_relaxes_short_queries_and_tightens_long_ones() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.adaptive("err"), 0.25);
        assert_eq!(thresholds.adaptive(&"x".repeat(250)), 0.40);
        assert_eq!(thresholds.adaptive(&"x".repeat(50)), 0.30);
    }
}
