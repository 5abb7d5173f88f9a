//! File prioritization: before indexing, the remaining changed-file set is
//! sorted by descending score so a batched run surfaces the highest-value
//! files first even if it is interrupted or budget-limited partway through.
//! Ties break by sorted path, so the ordering is fully deterministic for a
//! fixed input set.

use std::collections::HashSet;
use std::path::Path;

const PRIORITY_STEMS: &[&str] = &["main", "app", "index", "init", "run", "server"];
const PRIORITY_EXTENSIONS: &[&str] = &["md", "rst", "txt"];

/// Score `relative_path`: `+1000` if modified/staged in git, `+500` for a
/// well-known entry-point stem, `+300` for a doc extension, `+200`/`+100`
/// for repo depth 1/2. Higher sorts first.
#[must_use]
pub fn priority_score(relative_path: &str, changed_in_git: &HashSet<String>) -> i64 {
    let mut score = 0i64;
    let path = Path::new(relative_path);

    if changed_in_git.contains(relative_path) {
        score += 1000;
    }

    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        if PRIORITY_STEMS.iter().any(|s| s.eq_ignore_ascii_case(stem)) {
            score += 500;
        }
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if PRIORITY_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            score += 300;
        }
    }

    match path.components().count() {
        1 => score += 200,
        2 => score += 100,
        _ => {}
    }

    score
}

/// Sorts `relative_paths` by descending [`priority_score`], breaking ties
/// on the path string itself for determinism.
pub fn sort_by_priority(relative_paths: &mut [String], changed_in_git: &HashSet<String>) {
    relative_paths.sort_by(|a, b| {
        let score_a = priority_score(a, changed_in_git);
        let score_b = priority_score(b, changed_in_git);
        score_b.cmp(&score_a).then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_modified_file_outranks_everything_else() {
        let mut changed = HashSet::new();
        changed.insert("src/lib.rs".to_string());

        assert!(priority_score("src/lib.rs", &changed) > priority_score("main.py", &HashSet::new()));
    }

    #[test]
    fn entry_point_stem_outranks_plain_depth() {
        let empty = HashSet::new();
        assert!(priority_score("src/main.rs", &empty) > priority_score("src/helpers.rs", &empty));
    }

    #[test]
    fn doc_extension_beats_unscored_source() {
        let empty = HashSet::new();
        assert!(priority_score("docs/guide.md", &empty) > priority_score("src/deep/nested/mod.rs", &empty));
    }

    #[test]
    fn root_level_file_outranks_depth_two() {
        let empty = HashSet::new();
        assert!(priority_score("helpers.rs", &empty) > priority_score("src/helpers.rs", &empty));
        assert!(priority_score("src/helpers.rs", &empty) > priority_score("src/lib/helpers.rs", &empty));
    }

    #[test]
    fn sort_breaks_ties_on_path() {
        let empty = HashSet::new();
        let mut paths = vec!["b.txt".to_string(), "a.txt".to_string()];
        sort_by_priority(&mut paths, &empty);
        assert_eq!(paths, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn sort_puts_highest_score_first() {
        let mut changed = HashSet::new();
        changed.insert("src/weird.rs".to_string());
        let mut paths = vec![
            "src/helpers.rs".to_string(),
            "src/weird.rs".to_string(),
            "main.rs".to_string(),
        ];
        sort_by_priority(&mut paths, &changed);
        assert_eq!(paths[0], "src/weird.rs");
    }
}
