use serde::{Deserialize, Serialize};

use crate::chunk::ChunkType;
use crate::language::Language;

/// Per-chunk, language-aware health/complexity attributes.
///
/// Missing-language fallback: callers get `MetricsRecord::default()` rather
/// than an error — metrics are a nice-to-have sidecar, never a reason to
/// fail a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub cyclomatic_complexity: u32,
    pub cognitive_complexity: u32,
    pub nesting_depth: u32,
    pub parameter_count: u32,
    pub method_count: u32,
    pub loc: u32,
}

/// Branch/decision keywords whose presence increments cyclomatic complexity,
/// shared across the C-family/Python/JS/TS/Rust surface this registry
/// supports. Keyword lists deliberately overlap; a chunk only pays for the
/// tokens its own language actually uses.
fn branch_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[
            "if ", "elif ", "for ", "while ", "except ", "and ", "or ", "case ",
        ],
        Language::Rust => &[
            "if ", "else if", "for ", "while ", "match ", "&&", "||", "loop ",
        ],
        Language::JavaScript | Language::TypeScript => &[
            "if ", "else if", "for ", "while ", "case ", "&&", "||", "catch ", "?",
        ],
        _ => &["if ", "for ", "while ", "case ", "&&", "||"],
    }
}

fn method_signature_keyword(language: Language) -> Option<&'static str> {
    match language {
        Language::Rust => Some("fn "),
        Language::Python => Some("def "),
        Language::JavaScript | Language::TypeScript => Some("function "),
        Language::Java | Language::CSharp | Language::Kotlin | Language::Swift => Some("public "),
        _ => None,
    }
}

/// Compute metrics for a single chunk's source text. Never fails; unsupported
/// languages simply produce zeroed complexity fields alongside an accurate
/// LOC count.
#[must_use]
pub fn compute_metrics(language: Language, content: &str, chunk_type: ChunkType) -> MetricsRecord {
    let loc = content.lines().filter(|l| !l.trim().is_empty()).count() as u32;

    let keywords = branch_keywords(language);
    let mut cyclomatic = 1u32;
    let mut cognitive = 0u32;
    let mut max_nesting = 0u32;
    let mut current_nesting = 0i32;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        let indent = (raw_line.len() - raw_line.trim_start().len()) as i32;
        current_nesting = indent / 4;
        max_nesting = max_nesting.max(current_nesting.max(0) as u32);

        for kw in keywords {
            if line.contains(kw) {
                cyclomatic += 1;
                cognitive += 1 + current_nesting.max(0) as u32;
            }
        }
    }

    let parameter_count = content
        .find('(')
        .and_then(|open| {
            content[open..].find(')').map(|close| {
                let inner = &content[open + 1..open + close];
                if inner.trim().is_empty() {
                    0
                } else {
                    inner.split(',').count() as u32
                }
            })
        })
        .unwrap_or(0);

    let method_count = match chunk_type {
        ChunkType::Class | ChunkType::Interface | ChunkType::Mixin => {
            method_signature_keyword(language)
                .map(|kw| content.matches(kw).count() as u32)
                .unwrap_or(0)
        }
        _ => 0,
    };

    MetricsRecord {
        cyclomatic_complexity: cyclomatic,
        cognitive_complexity: cognitive,
        nesting_depth: max_nesting,
        parameter_count,
        method_count,
        loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_function_has_baseline_complexity() {
        let m = compute_metrics(Language::Rust, "fn helper() {\n    1\n}", ChunkType::Function);
        assert_eq!(m.cyclomatic_complexity, 1);
        assert_eq!(m.loc, 3);
    }

    #[test]
    fn branches_increase_complexity() {
        let content = "fn helper(x: i32) -> i32 {\n    if x > 0 {\n        return x;\n    }\n    0\n}";
        let m = compute_metrics(Language::Rust, content, ChunkType::Function);
        assert!(m.cyclomatic_complexity > 1);
    }

    #[test]
    fn unknown_language_still_counts_loc() {
        let m = compute_metrics(Language::Unknown, "a\nb\nc", ChunkType::Code);
        assert_eq!(m.loc, 3);
        assert_eq!(m.cyclomatic_complexity, 1);
    }
}
