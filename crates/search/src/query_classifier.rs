//! Cheap, rule-based query classification used to pick fusion weights and
//! candidate-pool sizing before any embedding call happens.

/// Coarse shape of a query, used only to pick fusion weights — never
/// surfaced to a caller as a hard routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Looks like a single identifier (`snake_case`, `camelCase`, or a
    /// dotted/`::`-qualified path): favor exact/fuzzy symbol matching.
    Symbol,
    /// Looks like a file path or contains a path separator.
    Path,
    /// A question or multi-word natural-language description: favor
    /// semantic similarity.
    NaturalLanguage,
}

/// Relative weight given to each ranking source when fusing, plus how many
/// candidates to pull from each source before fusion (`limit *
/// candidate_multiplier`).
#[derive(Debug, Clone, Copy)]
pub struct QueryWeights {
    pub semantic: f32,
    pub fuzzy: f32,
    pub candidate_multiplier: usize,
}

pub struct QueryClassifier;

impl QueryClassifier {
    #[must_use]
    pub fn classify(query: &str) -> QueryType {
        let trimmed = query.trim();
        if trimmed.contains('/') || trimmed.contains('\\') {
            return QueryType::Path;
        }

        let word_count = trimmed.split_whitespace().count();
        let looks_like_identifier = word_count == 1
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.'));

        if looks_like_identifier && !trimmed.is_empty() {
            QueryType::Symbol
        } else {
            QueryType::NaturalLanguage
        }
    }

    /// Weights favor fuzzy matching for symbol-shaped queries and semantic
    /// matching for natural-language ones; path-shaped queries split the
    /// difference since a path hint is a weak fuzzy signal on its own.
    #[must_use]
    pub fn weights(query: &str) -> QueryWeights {
        match Self::classify(query) {
            QueryType::Symbol => QueryWeights {
                semantic: 0.4,
                fuzzy: 0.6,
                candidate_multiplier: 8,
            },
            QueryType::Path => QueryWeights {
                semantic: 0.5,
                fuzzy: 0.5,
                candidate_multiplier: 6,
            },
            QueryType::NaturalLanguage => QueryWeights {
                semantic: 0.8,
                fuzzy: 0.2,
                candidate_multiplier: 5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_single_identifier_as_symbol() {
        assert_eq!(QueryClassifier::classify("get_user_profile"), QueryType::Symbol);
        assert_eq!(QueryClassifier::classify("HttpClient::new"), QueryType::Symbol);
    }

    #[test]
    fn classifies_path_like_queries() {
        assert_eq!(QueryClassifier::classify("src/api/handler.rs"), QueryType::Path);
    }

    #[test]
    fn classifies_questions_as_natural_language() {
        assert_eq!(
            QueryClassifier::classify("How do we handle ONNX threads?"),
            QueryType::NaturalLanguage
        );
    }

    #[test]
    fn symbol_queries_favor_fuzzy_weight() {
        let weights = QueryClassifier::weights("parse_data");
        assert!(weights.fuzzy > weights.semantic);
    }

    #[test]
    fn natural_language_favors_semantic_weight() {
        let weights = QueryClassifier::weights("how do we handle onnx threads");
        assert!(weights.semantic > weights.fuzzy);
    }
}
