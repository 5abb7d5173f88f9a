use std::collections::HashMap;
use std::path::Path;

use tree_sitter::{Node, Parser};

use crate::chunk::{ChunkMetadata, ChunkType, CodeChunk};
use crate::contextual_imports::{extract_imports_from_lines, filter_relevant_imports};
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::metrics::compute_metrics;

/// Tuning knobs for chunk extraction.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// How many of a file's imports to thread onto each chunk as context.
    pub context_import_limit: usize,
    /// Whether to compute `MetricsRecord`s during chunking (cheap; default on).
    pub compute_metrics: bool,
}

impl ChunkerConfig {
    /// Defaults tuned for embedding-oriented chunking: generous import
    /// context, metrics always on (consumed by reranking/boosting).
    #[must_use]
    pub fn for_embeddings() -> Self {
        Self {
            context_import_limit: 5,
            compute_metrics: true,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::for_embeddings()
    }
}

/// Extracts `CodeChunk`s (with structural context and hierarchy already
/// resolved) from a single file's source text.
pub struct Chunker {
    config: ChunkerConfig,
}

/// One parsed symbol, prior to being turned into a `CodeChunk`.
#[derive(Debug, Clone)]
struct SymbolRecord {
    name: String,
    kind: ChunkType,
    start_line: usize,
    end_line: usize,
    parent_name: Option<String>,
    nesting_level: usize,
    parameters: Vec<String>,
    decorators: Vec<String>,
    return_type: Option<String>,
    docstring: Option<String>,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk a file on disk.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<CodeChunk>> {
        let content = std::fs::read_to_string(path)?;
        let relative = path.to_string_lossy().to_string();
        self.chunk_str(&content, Some(&relative))
    }

    /// Chunk raw source text. `relative_path` is used both to infer the
    /// language and to stamp `CodeChunk::file_path`.
    pub fn chunk_str(&self, content: &str, relative_path: Option<&str>) -> Result<Vec<CodeChunk>> {
        let path = relative_path.unwrap_or("<memory>");
        let language = Language::from_path(path);

        let module_chunk = self.build_module_chunk(path, content, language);

        if !language.supports_ast() {
            return Ok(vec![module_chunk]);
        }

        let symbols = match self.extract_symbols(language, content) {
            Ok(symbols) => symbols,
            Err(err) => {
                log::warn!("parse failed for {path}: {err}");
                return Err(ChunkerError::parse_failed(path, err.to_string()));
            }
        };

        if symbols.is_empty() {
            return Ok(vec![module_chunk]);
        }

        let lines: Vec<&str> = content.lines().collect();
        let file_imports = extract_imports_from_lines(language, &lines, 64);

        let mut chunks = Vec::with_capacity(symbols.len() + 1);
        chunks.push(module_chunk);

        for symbol in &symbols {
            let chunk = self.symbol_to_chunk(path, language, content, &lines, &file_imports, symbol);
            chunks.push(chunk);
        }

        resolve_hierarchy(&mut chunks);

        Ok(chunks)
    }

    /// Per-chunk metrics, keyed by `chunk_id`, for callers to persist
    /// alongside the chunk rather than inside it. Returns an empty map when
    /// `compute_metrics` is disabled in this chunker's config.
    #[must_use]
    pub fn chunk_metrics(
        &self,
        chunks: &[CodeChunk],
    ) -> HashMap<String, crate::metrics::MetricsRecord> {
        if !self.config.compute_metrics {
            return HashMap::new();
        }
        chunks
            .iter()
            .map(|c| {
                (
                    c.chunk_id.clone(),
                    compute_metrics(c.language, &c.content, c.metadata.chunk_type),
                )
            })
            .collect()
    }

    fn build_module_chunk(&self, path: &str, content: &str, language: Language) -> CodeChunk {
        let end_line = content.lines().count().max(1);
        let metadata = ChunkMetadata {
            chunk_type: ChunkType::Module,
            symbol_name: Some(module_name(path)),
            qualified_name: Some(module_name(path)),
            parent_context: None,
            nesting_level: 0,
            chunk_depth: 0,
            ..ChunkMetadata::default()
        };
        let mut chunk = CodeChunk::new(path.to_string(), 1, end_line, content.to_string(), metadata);
        chunk.language = language;
        chunk
    }

    fn symbol_to_chunk(
        &self,
        path: &str,
        language: Language,
        full_content: &str,
        lines: &[&str],
        file_imports: &[String],
        symbol: &SymbolRecord,
    ) -> CodeChunk {
        let start_idx = symbol.start_line.saturating_sub(1);
        let end_idx = symbol.end_line.min(lines.len());
        let text = if start_idx < end_idx {
            lines[start_idx..end_idx].join("\n")
        } else {
            String::new()
        };

        let parent_context = match &symbol.parent_name {
            Some(parent) => format!("Class: {} > {}: {}", parent, chunk_label(symbol.kind), symbol.name),
            None => "Module Level".to_string(),
        };

        let relevant_imports =
            filter_relevant_imports(language, file_imports, &text, self.config.context_import_limit);

        let qualified_name = match &symbol.parent_name {
            Some(parent) => format!("{parent}::{}", symbol.name),
            None => symbol.name.clone(),
        };

        let metadata = ChunkMetadata {
            chunk_type: symbol.kind,
            symbol_name: Some(symbol.name.clone()),
            qualified_name: Some(qualified_name),
            class_name: symbol.parent_name.clone(),
            function_name: matches!(symbol.kind, ChunkType::Function | ChunkType::Method | ChunkType::Constructor)
                .then(|| symbol.name.clone()),
            parent_context: Some(parent_context.clone()),
            parent_scope: symbol.parent_name.clone(),
            breadcrumb: Some(format!("{path} > {parent_context}")),
            nesting_level: symbol.nesting_level,
            parameters: symbol.parameters.clone(),
            decorators: symbol.decorators.clone(),
            return_type: symbol.return_type.clone(),
            docstring: symbol.docstring.clone(),
            documentation: symbol.docstring.clone(),
            context_imports: relevant_imports,
            chunk_depth: if symbol.parent_name.is_some() { 2 } else { 1 },
            ..ChunkMetadata::default()
        };

        let mut chunk = CodeChunk::new(path.to_string(), symbol.start_line, symbol.end_line, text, metadata);
        chunk.language = language;
        let _ = full_content;
        chunk
    }

    fn extract_symbols(&self, language: Language, content: &str) -> Result<Vec<SymbolRecord>> {
        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::GrammarError(e.to_string()))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::Other("tree-sitter produced no parse tree".into()))?;

        let mut symbols = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        walk(tree.root_node(), content.as_bytes(), language, 0, &mut stack, &mut symbols);
        Ok(symbols)
    }
}

fn module_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn chunk_label(kind: ChunkType) -> &'static str {
    match kind {
        ChunkType::Function => "Function",
        ChunkType::Method => "Method",
        ChunkType::Constructor => "Constructor",
        ChunkType::Class => "Class",
        ChunkType::Interface => "Interface",
        ChunkType::Mixin => "Mixin",
        ChunkType::Module => "Module",
        ChunkType::Code => "Block",
    }
}

/// Node kinds, per language, that represent a container symbols nest inside
/// (class-like) versus a callable symbol (function-like). `is_container`
/// distinguishes whether the node itself yields a chunk (classes do) or only
/// provides a naming frame for its children (impl blocks do not, in Rust).
struct NodeClass {
    chunk_type: Option<ChunkType>,
    is_container_frame: bool,
}

fn classify_node(language: Language, kind: &str) -> Option<NodeClass> {
    match language {
        Language::Rust => match kind {
            "function_item" => Some(NodeClass {
                chunk_type: Some(ChunkType::Function),
                is_container_frame: false,
            }),
            "struct_item" | "enum_item" => Some(NodeClass {
                chunk_type: Some(ChunkType::Class),
                is_container_frame: true,
            }),
            "trait_item" => Some(NodeClass {
                chunk_type: Some(ChunkType::Interface),
                is_container_frame: true,
            }),
            "impl_item" => Some(NodeClass {
                chunk_type: None,
                is_container_frame: true,
            }),
            "mod_item" => Some(NodeClass {
                chunk_type: None,
                is_container_frame: true,
            }),
            _ => None,
        },
        Language::Python => match kind {
            "function_definition" => Some(NodeClass {
                chunk_type: Some(ChunkType::Function),
                is_container_frame: false,
            }),
            "class_definition" => Some(NodeClass {
                chunk_type: Some(ChunkType::Class),
                is_container_frame: true,
            }),
            _ => None,
        },
        Language::JavaScript | Language::TypeScript => match kind {
            "function_declaration" | "method_definition" | "arrow_function" => Some(NodeClass {
                chunk_type: Some(ChunkType::Function),
                is_container_frame: false,
            }),
            "class_declaration" => Some(NodeClass {
                chunk_type: Some(ChunkType::Class),
                is_container_frame: true,
            }),
            "interface_declaration" => Some(NodeClass {
                chunk_type: Some(ChunkType::Interface),
                is_container_frame: true,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn node_name(node: Node, source: &[u8]) -> Option<String> {
    node.child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

fn node_params(node: Node, source: &[u8]) -> Vec<String> {
    node.child_by_field_name("parameters")
        .and_then(|n| n.utf8_text(source).ok())
        .map(split_params)
        .unwrap_or_default()
}

fn node_return_type(node: Node, source: &[u8]) -> Option<String> {
    node.child_by_field_name("return_type")
        .or_else(|| node.child_by_field_name("type"))
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

/// Split a raw parameter-list text (including outer parens) on top-level
/// commas only, so generics/defaults with nested commas stay intact.
fn split_params(raw: &str) -> Vec<String> {
    let inner = raw.trim().trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

fn leading_doc_comment(node: Node, source: &[u8], language: Language) -> Option<String> {
    let mut lines = Vec::new();
    let mut cursor = node.prev_sibling();
    while let Some(sibling) = cursor {
        let kind = sibling.kind();
        let is_comment = matches!(kind, "line_comment" | "block_comment" | "comment");
        if !is_comment {
            break;
        }
        let text = sibling.utf8_text(source).ok()?.trim().to_string();
        let is_doc = match language {
            Language::Rust => text.starts_with("///") || text.starts_with("/**"),
            _ => true,
        };
        if !is_doc {
            break;
        }
        lines.push(text);
        cursor = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// Python's docstring convention: the first statement in the body is a bare
/// string expression.
fn python_docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    string_node
        .utf8_text(source)
        .ok()
        .map(|s| s.trim_matches(['"', '\'']).trim().to_string())
}

fn decorators_for(node: Node, source: &[u8]) -> Vec<String> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    if parent.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = parent.walk();
    parent
        .children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .filter_map(|c| c.utf8_text(source).ok())
        .map(|s| s.trim_start_matches('@').trim().to_string())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn walk(
    node: Node,
    source: &[u8],
    language: Language,
    nesting_level: usize,
    container_stack: &mut Vec<String>,
    out: &mut Vec<SymbolRecord>,
) {
    let kind = node.kind();

    if kind == "decorated_definition" {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "function_definition" || child.kind() == "class_definition" {
                walk(child, source, language, nesting_level, container_stack, out);
            }
        }
        return;
    }

    if let Some(class) = classify_node(language, kind) {
        let name = node_name(node, source);
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;

        if class.is_container_frame {
            let frame_name = name.clone().unwrap_or_else(|| "anonymous".to_string());
            if let Some(chunk_type) = class.chunk_type {
                out.push(SymbolRecord {
                    name: frame_name.clone(),
                    kind: chunk_type,
                    start_line,
                    end_line,
                    parent_name: container_stack.last().cloned(),
                    nesting_level,
                    parameters: Vec::new(),
                    decorators: decorators_for(node, source),
                    return_type: None,
                    docstring: leading_doc_comment(node, source, language)
                        .or_else(|| python_docstring(node, source)),
                });
            }
            container_stack.push(frame_name);
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk(child, source, language, nesting_level + 1, container_stack, out);
            }
            container_stack.pop();
            return;
        }

        if let Some(name) = name {
            let kind = if container_stack.is_empty() {
                ChunkType::Function
            } else {
                ChunkType::Method
            };
            let kind = if name == "new" || name == "__init__" || name == "constructor" {
                ChunkType::Constructor
            } else {
                kind
            };
            out.push(SymbolRecord {
                name,
                kind,
                start_line,
                end_line,
                parent_name: container_stack.last().cloned(),
                nesting_level,
                parameters: node_params(node, source),
                decorators: decorators_for(node, source),
                return_type: node_return_type(node, source),
                docstring: leading_doc_comment(node, source, language)
                    .or_else(|| python_docstring(node, source)),
            });
        }
        // Functions can still nest (closures, local fns) — recurse into body.
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, language, nesting_level, container_stack, out);
    }
}

/// Three-pass hierarchy resolution over a file's already-built chunks:
/// attach functions/methods to their class (or the module, if none), attach
/// classes to the module, and fill in `child_chunk_ids`/`chunk_depth`.
/// `chunks[0]` is always the module chunk.
fn resolve_hierarchy(chunks: &mut [CodeChunk]) {
    let module_id = chunks[0].chunk_id.clone();
    let classes_by_name: HashMap<String, (String, usize)> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.metadata.chunk_type, ChunkType::Class | ChunkType::Interface | ChunkType::Mixin))
        .map(|(_, c)| {
            (
                c.metadata.symbol_name.clone().unwrap_or_default(),
                (c.chunk_id.clone(), c.metadata.chunk_depth),
            )
        })
        .collect();

    let mut parent_assignments: Vec<(usize, String, usize)> = Vec::new();

    for (idx, chunk) in chunks.iter().enumerate() {
        match chunk.metadata.chunk_type {
            ChunkType::Module => continue,
            ChunkType::Class | ChunkType::Interface | ChunkType::Mixin => {
                parent_assignments.push((idx, module_id.clone(), 1));
            }
            ChunkType::Function | ChunkType::Method | ChunkType::Constructor => {
                if let Some(class_name) = &chunk.metadata.class_name {
                    if let Some((class_id, class_depth)) = classes_by_name.get(class_name) {
                        parent_assignments.push((idx, class_id.clone(), class_depth + 1));
                        continue;
                    }
                }
                parent_assignments.push((idx, module_id.clone(), 1));
            }
            ChunkType::Code => {}
        }
    }

    let mut child_ids: HashMap<String, Vec<String>> = HashMap::new();
    for (idx, parent_id, depth) in &parent_assignments {
        chunks[*idx].metadata.parent_chunk_id = Some(parent_id.clone());
        chunks[*idx].metadata.chunk_depth = *depth;
        let child_id = chunks[*idx].chunk_id.clone();
        child_ids.entry(parent_id.clone()).or_default().push(child_id);
    }

    for chunk in chunks.iter_mut() {
        if let Some(children) = child_ids.remove(&chunk.chunk_id) {
            for child in children {
                chunk.metadata.add_child(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_module_and_function() {
        let chunker = Chunker::new(ChunkerConfig::for_embeddings());
        let content = "def helper(x):\n    return x * 2\n";
        let chunks = chunker.chunk_str(content, Some("src/a.py")).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::Module);
        let func = &chunks[1];
        assert_eq!(func.metadata.chunk_type, ChunkType::Function);
        assert_eq!(func.metadata.parent_context.as_deref(), Some("Module Level"));
        assert_eq!(func.metadata.nesting_level, 0);
        assert_eq!(func.metadata.chunk_depth, 1);
    }

    #[test]
    fn python_class_with_method() {
        let chunker = Chunker::new(ChunkerConfig::for_embeddings());
        let content = "class C:\n    def m(self):\n        pass\n";
        let chunks = chunker.chunk_str(content, Some("src/b.py")).unwrap();
        // module + class + method
        assert_eq!(chunks.len(), 3);
        let class_chunk = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == ChunkType::Class)
            .unwrap();
        let method_chunk = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == ChunkType::Method)
            .unwrap();
        assert_eq!(method_chunk.metadata.class_name.as_deref(), Some("C"));
        assert_eq!(
            method_chunk.metadata.parent_chunk_id.as_deref(),
            Some(class_chunk.chunk_id.as_str())
        );
        assert!(class_chunk.metadata.child_chunk_ids.contains(&method_chunk.chunk_id));
    }

    #[test]
    fn unsupported_language_yields_single_code_chunk() {
        let chunker = Chunker::new(ChunkerConfig::for_embeddings());
        let chunks = chunker.chunk_str("SELECT 1;", Some("q.sql")).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::Module);
    }

    #[test]
    fn rust_function_has_parameters() {
        let chunker = Chunker::new(ChunkerConfig::for_embeddings());
        let content = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunker.chunk_str(content, Some("src/lib.rs")).unwrap();
        let func = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == ChunkType::Function)
            .unwrap();
        assert_eq!(func.metadata.parameters.len(), 2);
        assert_eq!(func.metadata.return_type.as_deref(), Some("i32"));
    }
}
