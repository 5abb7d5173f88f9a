use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Category of a retrievable code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Module,
    Class,
    Interface,
    Mixin,
    Function,
    Method,
    Constructor,
    Code,
}

impl ChunkType {
    /// Baseline priority used for sorting and for score boosting when a
    /// symbol-specific weight hasn't been assigned.
    pub const fn priority(self) -> u32 {
        match self {
            Self::Function | Self::Method | Self::Constructor => 90,
            Self::Class | Self::Interface | Self::Mixin => 70,
            Self::Module => 50,
            Self::Code => 30,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Mixin => "mixin",
            Self::Function => "function",
            Self::Method => "method",
            Self::Constructor => "constructor",
            Self::Code => "code",
        }
    }
}

impl Default for ChunkType {
    fn default() -> Self {
        Self::Code
    }
}

/// Sidecar metadata attached to a `CodeChunk`, used both for chunk-hierarchy
/// bookkeeping and for embedding-template rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_type: ChunkType,
    pub symbol_name: Option<String>,
    pub qualified_name: Option<String>,
    pub class_name: Option<String>,
    pub function_name: Option<String>,
    pub parent_context: Option<String>,
    pub parent_scope: Option<String>,
    pub breadcrumb: Option<String>,
    pub nesting_level: usize,
    pub parameters: Vec<String>,
    pub decorators: Vec<String>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub documentation: Option<String>,
    pub tags: Vec<String>,
    pub bundle_tags: Vec<String>,
    pub related_paths: Vec<String>,
    pub context_imports: Vec<String>,
    pub parent_chunk_id: Option<String>,
    pub child_chunk_ids: Vec<String>,
    pub chunk_depth: usize,
}

impl ChunkMetadata {
    #[must_use]
    pub fn chunk_type(mut self, chunk_type: ChunkType) -> Self {
        self.chunk_type = chunk_type;
        self
    }

    #[must_use]
    pub fn symbol_name(mut self, name: impl Into<String>) -> Self {
        self.symbol_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn qualified_name(mut self, name: impl Into<String>) -> Self {
        self.qualified_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn parent_context(mut self, ctx: impl Into<String>) -> Self {
        self.parent_context = Some(ctx.into());
        self
    }

    #[must_use]
    pub fn documented(&self) -> bool {
        self.docstring.is_some() || self.documentation.is_some()
    }

    pub fn add_child(&mut self, child_id: String) {
        if !self.child_chunk_ids.contains(&child_id) {
            self.child_chunk_ids.push(child_id);
        }
    }
}

/// A retrievable unit of source code, the atom the rest of the pipeline
/// operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub content_hash: String,
    pub language: Language,
    pub metadata: ChunkMetadata,
}

impl CodeChunk {
    #[must_use]
    pub fn new(
        file_path: String,
        start_line: usize,
        end_line: usize,
        content: String,
        metadata: ChunkMetadata,
    ) -> Self {
        let language = Language::from_path(&file_path);
        let content_hash = hash_content(&content);
        let chunk_id = compute_chunk_id(
            &file_path,
            start_line,
            end_line,
            metadata.function_name.as_deref().unwrap_or(""),
            metadata.class_name.as_deref().unwrap_or(""),
        );
        Self {
            chunk_id,
            file_path,
            start_line,
            end_line,
            content,
            content_hash,
            language,
            metadata,
        }
    }

    /// `"path:line"`, suitable for editor-style navigation.
    #[must_use]
    pub fn navigation_hint(&self) -> String {
        format!("{}:{}", self.file_path, self.start_line)
    }

    /// Human-readable path through the chunk hierarchy: `"relpath > parent_context"`.
    #[must_use]
    pub fn breadcrumb(&self) -> String {
        match &self.metadata.parent_context {
            Some(ctx) if !ctx.is_empty() => format!("{} > {}", self.file_path, ctx),
            _ => self.file_path.clone(),
        }
    }

    /// `"# Context: <parent_context> (<chunk_type>)"` — carried as metadata
    /// rather than spliced into `content` so line ranges stay exact; callers
    /// that want structural context in the embedded text prepend this
    /// themselves at render time.
    #[must_use]
    pub fn context_prefix_line(&self) -> Option<String> {
        if self.metadata.chunk_type == ChunkType::Module {
            return None;
        }
        self.metadata
            .parent_context
            .as_ref()
            .map(|ctx| format!("# Context: {} ({})", ctx, self.metadata.chunk_type.as_str()))
    }
}

/// Stable hash of chunk-identifying content, normalized (trailing whitespace
/// stripped per line) so immaterial whitespace changes don't churn hashes.
#[must_use]
pub fn hash_content(content: &str) -> String {
    let normalized: String = content
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk id: stable hash of `(path, start_line, end_line,
/// function_name, class_name)`, unique across reindexings as long as the
/// signature tuple is stable.
#[must_use]
pub fn compute_chunk_id(
    path: &str,
    start_line: usize,
    end_line: usize,
    function_name: &str,
    class_name: &str,
) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(end_line.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(function_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(class_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_across_rebuilds() {
        let a = compute_chunk_id("src/a.rs", 1, 10, "helper", "");
        let b = compute_chunk_id("src/a.rs", 1, 10, "helper", "");
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_differs_on_signature_change() {
        let a = compute_chunk_id("src/a.rs", 1, 10, "helper", "");
        let b = compute_chunk_id("src/a.rs", 1, 10, "helper2", "");
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_ignores_trailing_whitespace() {
        let a = hash_content("fn helper() {}\n");
        let b = hash_content("fn helper() {}   \n");
        assert_eq!(a, b);
    }

    #[test]
    fn navigation_hint_format() {
        let chunk = CodeChunk::new(
            "src/a.rs".into(),
            3,
            5,
            "fn helper() {}".into(),
            ChunkMetadata::default(),
        );
        assert_eq!(chunk.navigation_hint(), "src/a.rs:3");
    }
}
