//! Project file discovery: enumerates indexable files honoring
//! extension filters, size caps, dotfile/ignore rules and `.gitignore`,
//! returning a deterministic (sorted) file list. Results are cached for a
//! short window so repeated `index_project` calls in a watch loop don't
//! re-walk the tree on every debounce tick.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use once_cell::sync::Lazy;

/// Default extension allow-list, generalized from a single-language default
/// (`{'.py'}`) to every language this workspace's chunker registry actually
/// parses, or falls back to a whole-file chunk for.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "py", "pyw", "js", "mjs", "cjs", "ts", "tsx", "go", "java", "c", "h", "cpp", "cc", "cxx",
    "hpp", "hh", "hxx", "cs", "rb", "swift", "kt", "kts", "md", "mdx", "rst", "yaml", "yml", "json",
    "toml", "sql", "sh", "bash", "tf", "tfvars", "html", "css", "scss",
];

/// Dotfiles that carry real project configuration and must never be dropped
/// by a naive "skip anything starting with a dot" rule.
const ALLOWED_DOTFILES: &[&str] = &[
    ".env",
    ".gitignore",
    ".gitattributes",
    ".dockerignore",
    ".editorconfig",
    ".prettierrc",
    ".eslintrc",
    ".pylintrc",
    ".flake8",
    ".coveragerc",
    ".pre-commit-config.yaml",
    ".pre-commit-hooks.yaml",
];

/// Directories never worth walking into regardless of `.gitignore` state.
const ALWAYS_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".mcp-code-intelligence",
    "target",
    "node_modules",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
];

const DEFAULT_MAX_FILE_SIZE_KB: u64 = 10 * 1024;
const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    computed_at: Instant,
    files: Vec<PathBuf>,
}

static SCAN_CACHE: Lazy<Mutex<std::collections::HashMap<PathBuf, CacheEntry>>> =
    Lazy::new(|| Mutex::new(std::collections::HashMap::new()));

/// Enumerates indexable files under a project root.
pub struct FileScanner {
    root: PathBuf,
    extensions: HashSet<String>,
    max_file_size_kb: u64,
}

impl FileScanner {
    /// Scanner with the default extension allow-list and 10 MiB size cap.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            max_file_size_kb: DEFAULT_MAX_FILE_SIZE_KB,
        }
    }

    /// Scanner restricted to a caller-supplied extension allow-list (from
    /// `.mcp/mcp.json`'s `file_extensions` key).
    #[must_use]
    pub fn with_extensions(root: impl AsRef<Path>, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self {
            root: root.as_ref().to_path_buf(),
            extensions,
            max_file_size_kb: DEFAULT_MAX_FILE_SIZE_KB,
        }
    }

    #[must_use]
    pub const fn with_max_file_size_kb(mut self, max_file_size_kb: u64) -> Self {
        self.max_file_size_kb = max_file_size_kb;
        self
    }

    /// Scan the project root, returning a sorted, deduplicated file list.
    /// Cached for 5 minutes keyed by `root`; call [`Self::rescan`] to force
    /// a fresh walk.
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        {
            let cache = SCAN_CACHE.lock().unwrap();
            if let Some(entry) = cache.get(&self.root) {
                if entry.computed_at.elapsed() < CACHE_TTL {
                    return entry.files.clone();
                }
            }
        }
        self.rescan()
    }

    /// Force a fresh walk, bypassing and refreshing the cache.
    #[must_use]
    pub fn rescan(&self) -> Vec<PathBuf> {
        let files = self.walk();
        let mut cache = SCAN_CACHE.lock().unwrap();
        cache.insert(
            self.root.clone(),
            CacheEntry {
                computed_at: Instant::now(),
                files: files.clone(),
            },
        );
        files
    }

    fn walk(&self) -> Vec<PathBuf> {
        let mut walker = WalkBuilder::new(&self.root);
        walker
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .parents(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return !ALWAYS_IGNORED_DIRS.iter().any(|d| name.eq_ignore_ascii_case(d));
                }
                if name.starts_with('.') {
                    return ALLOWED_DOTFILES.iter().any(|allowed| name == *allowed);
                }
                true
            });

        let mut files: Vec<PathBuf> = walker
            .build()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|path| self.is_indexable(path))
            .collect();

        files.sort();
        files.dedup();
        files
    }

    fn is_indexable(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false);
        if !ext_ok {
            return false;
        }

        match std::fs::metadata(path) {
            Ok(meta) => {
                let max_bytes = self.max_file_size_kb * 1024;
                if meta.len() > max_bytes {
                    log::warn!(
                        "Skipping oversized file: {} ({} bytes > {} bytes limit)",
                        path.display(),
                        meta.len(),
                        max_bytes
                    );
                    false
                } else {
                    true
                }
            }
            Err(_) => false,
        }
    }
}

/// Invalidates the 5-minute scan cache for every project root. Used by
/// tests and by an explicit "rescan" tool call.
pub fn clear_scan_cache() {
    SCAN_CACHE.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, contents: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn scan_is_sorted_and_respects_extensions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.py", "print('b')");
        write(&dir, "a.rs", "fn a() {}");
        write(&dir, "notes.txt", "not indexable");

        clear_scan_cache();
        let files = FileScanner::new(dir.path()).scan();
        let rels: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(rels, vec!["a.rs".to_string(), "b.py".to_string()]);
    }

    #[test]
    fn scan_skips_ignored_dirs_and_oversized_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "target/debug/build.rs", "fn generated() {}");
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, "huge.py", &"x".repeat(200));

        clear_scan_cache();
        let files = FileScanner::new(dir.path())
            .with_max_file_size_kb(0)
            .scan();
        assert!(files.is_empty());

        clear_scan_cache();
        let files = FileScanner::new(dir.path()).scan();
        let rels: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(rels, vec!["src/main.rs".to_string()]);
    }

    #[test]
    fn allowed_dotfiles_are_kept_but_others_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".env", "SECRET=1");
        write(&dir, ".hidden_cache", "nope");

        let scanner = FileScanner::with_extensions(dir.path(), &["env".to_string()]);
        clear_scan_cache();
        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(".env"));
    }

    #[test]
    fn honors_gitignore_rules() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "ignored.rs\n");
        write(&dir, "ignored.rs", "fn x() {}");
        write(&dir, "kept.rs", "fn y() {}");

        clear_scan_cache();
        let files = FileScanner::new(dir.path()).scan();
        let rels: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        assert!(rels.contains(&"kept.rs".to_string()));
        assert!(!rels.contains(&"ignored.rs".to_string()));
    }
}
