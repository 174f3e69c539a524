//! TypeScript/TSX syntax extraction.
//!
//! One grammar (tree-sitter TSX, which also accepts plain `.ts`, `.js` and `.jsx`)
//! serves both the dependency graph (import specifiers) and the semantic index
//! (definition chunks). Queries are compiled once and shared; parsers are cheap and
//! created per call because they are not `Sync`.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tree_sitter::{Language, Parser, Query, QueryCursor, StreamingIterator, Tree};

/// Extensions handled by the grammar.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

// `import x = require("...")` keeps its string on the require clause; the plain alias
// form (`import x = ns.y`) names no module and has nothing to capture.
const IMPORT_QUERY: &str = r#"
(import_statement source: (string) @source)
(import_require_clause source: (string) @source)
(export_statement source: (string) @source)
"#;

const DEFINITION_QUERY: &str = r#"
(class_declaration name: (_) @name) @class
(function_declaration name: (_) @name) @function
(variable_declarator name: (_) @name value: (arrow_function)) @constant
(method_definition name: (_) @name) @method
"#;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("failed to load grammar: {0}")]
    Language(String),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("parser produced no tree")]
    Parse,
}

/// Kind of a definition chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Constant,
    Method,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Constant => "constant",
            ChunkKind::Method => "method",
            ChunkKind::Other => "other",
        }
    }

    fn from_capture(name: &str) -> Option<Self> {
        match name {
            "function" => Some(ChunkKind::Function),
            "class" => Some(ChunkKind::Class),
            "constant" => Some(ChunkKind::Constant),
            "method" => Some(ChunkKind::Method),
            _ => None,
        }
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_capture(s).unwrap_or(ChunkKind::Other))
    }
}

/// A definition found in a source file. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub kind: ChunkKind,
    pub name: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

struct Queries {
    imports: Query,
    definitions: Query,
}

static QUERIES: LazyLock<Result<Queries, String>> = LazyLock::new(|| {
    let language = language();
    let imports = Query::new(&language, IMPORT_QUERY).map_err(|e| e.to_string())?;
    let definitions = Query::new(&language, DEFINITION_QUERY).map_err(|e| e.to_string())?;
    Ok(Queries {
        imports,
        definitions,
    })
});

fn language() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn queries() -> Result<&'static Queries, SyntaxError> {
    QUERIES
        .as_ref()
        .map_err(|e| SyntaxError::Query(e.clone()))
}

/// Whether `path` has an extension the grammar handles.
pub fn is_source_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn parse(source: &str) -> Result<Tree, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language())
        .map_err(|e| SyntaxError::Language(e.to_string()))?;
    parser.parse(source, None).ok_or(SyntaxError::Parse)
}

/// Module specifiers from `import ... from`, `import x = require(...)` and
/// `export ... from`, in source order.
pub fn extract_imports(source: &str) -> Result<Vec<String>, SyntaxError> {
    let queries = queries()?;
    let tree = parse(source)?;
    let bytes = source.as_bytes();

    let mut specifiers = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&queries.imports, tree.root_node(), bytes);
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let Ok(raw) = capture.node.utf8_text(bytes) else {
                continue;
            };
            let specifier = raw.trim_matches(|c| c == '"' || c == '\'' || c == '`');
            if !specifier.is_empty() && !specifiers.iter().any(|s| s == specifier) {
                specifiers.push(specifier.to_string());
            }
        }
    }
    Ok(specifiers)
}

/// Classes, functions, arrow-function constants and methods, in source order.
pub fn extract_definitions(source: &str) -> Result<Vec<Definition>, SyntaxError> {
    let queries = queries()?;
    let tree = parse(source)?;
    let bytes = source.as_bytes();
    let names = queries.definitions.capture_names();

    let mut definitions = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&queries.definitions, tree.root_node(), bytes);
    while let Some(m) = matches.next() {
        let mut outer = None;
        let mut name = None;
        for capture in m.captures {
            let capture_name = names[capture.index as usize];
            if capture_name == "name" {
                name = capture.node.utf8_text(bytes).ok();
            } else if let Some(kind) = ChunkKind::from_capture(capture_name) {
                outer = Some((kind, capture.node));
            }
        }
        let Some((kind, node)) = outer else {
            continue;
        };
        let Ok(text) = node.utf8_text(bytes) else {
            continue;
        };
        definitions.push(Definition {
            kind,
            name: name.unwrap_or("anonymous").to_string(),
            text: text.to_string(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
    }
    definitions.sort_by_key(|d| d.start_line);
    Ok(definitions)
}
