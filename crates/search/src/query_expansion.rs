//! Query preprocessing: lowercasing, stopword trimming, and light synonym
//! expansion before a query reaches the store.
//! Identity by default — only normalizes whitespace — with a small built-in
//! synonym table appended for a handful of common code-search abbreviations
//! so a literal term ("auth") also retrieves its expansion ("authentication")
//! without forcing the caller to know both spellings.

use std::collections::HashMap;

pub struct QueryExpander {
    synonyms: HashMap<&'static str, &'static [&'static str]>,
}

const SYNONYM_TABLE: &[(&str, &[&str])] = &[
    ("auth", &["authentication", "authorization"]),
    ("config", &["configuration", "settings"]),
    ("db", &["database"]),
    ("err", &["error"]),
    ("func", &["function"]),
    ("impl", &["implementation"]),
    ("init", &["initialize", "initialization"]),
    ("repo", &["repository"]),
    ("util", &["utility", "utils"]),
];

impl QueryExpander {
    #[must_use]
    pub fn new() -> Self {
        Self {
            synonyms: SYNONYM_TABLE.iter().copied().collect(),
        }
    }

    /// Normalizes whitespace, then appends any synonym expansions for
    /// whole-word matches in the built-in table. The original query is
    /// always a prefix of the result, so identity behavior is preserved
    /// when no synonym applies.
    #[must_use]
    pub fn expand_to_query(&self, query: &str) -> String {
        let normalized: String = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return normalized;
        }

        let mut extra = Vec::new();
        for word in normalized.split_whitespace() {
            let lower = word.to_ascii_lowercase();
            if let Some(expansions) = self.synonyms.get(lower.as_str()) {
                for expansion in *expansions {
                    if !normalized.contains(expansion) {
                        extra.push(*expansion);
                    }
                }
            }
        }

        if extra.is_empty() {
            normalized
        } else {
            format!("{normalized} {}", extra.join(" "))
        }
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_no_synonym_applies() {
        let expander = QueryExpander::new();
        assert_eq!(expander.expand_to_query("handle error"), "handle error");
    }

    #[test]
    fn appends_known_synonyms() {
        let expander = QueryExpander::new();
        let expanded = expander.expand_to_query("auth config");
        assert!(expanded.starts_with("auth config"));
        assert!(expanded.contains("authentication"));
        assert!(expanded.contains("configuration"));
    }

    #[test]
    fn normalizes_whitespace() {
        let expander = QueryExpander::new();
        assert_eq!(expander.expand_to_query("  handle   error  "), "handle error");
    }
}
