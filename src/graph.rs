//! Dependency graph over workspace source files.
//!
//! A node is a file; an edge is an import specifier resolved to a concrete file.
//! Dependents are never stored directly: they are recomputed as the full inverse of
//! the import edges every time the edge set changes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::syntax;
use crate::util::{display_relative, normalize_path};
use crate::workspace::source_files;

/// Suffixes probed, in order, when resolving a specifier to a file.
const RESOLVE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    "/index.ts",
    "/index.tsx",
    "/index.js",
];

/// Default traversal depth for blast-radius queries.
pub const DEFAULT_BLAST_DEPTH: usize = 3;

/// Graph shared between the tool executor and the file watcher.
pub type SharedGraph = Arc<RwLock<CodeGraph>>;

#[derive(Debug, Clone, Default)]
pub struct GraphNode {
    pub path: PathBuf,
    /// Resolved import targets, deduplicated, in source order
    pub imports: Vec<PathBuf>,
    /// Files importing this one (derived)
    pub dependents: BTreeSet<PathBuf>,
}

/// Workspace-relative view of one node.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeSummary {
    pub imports: Vec<String>,
    pub dependents: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CodeGraph {
    root: PathBuf,
    nodes: HashMap<PathBuf, GraphNode>,
}

impl CodeGraph {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_path(&root.into()),
            nodes: HashMap::new(),
        }
    }

    /// Build a graph of every source file under `root`.
    pub async fn build(root: impl Into<PathBuf>) -> Self {
        let mut graph = Self::new(root);
        graph.rebuild().await;
        graph
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, path: &Path) -> Option<&GraphNode> {
        self.nodes.get(&normalize_path(path))
    }

    /// Drop all nodes and re-scan the workspace.
    pub async fn rebuild(&mut self) {
        self.nodes.clear();
        let files = source_files(&self.root);
        for file in &files {
            self.process_file(file).await;
        }
        self.recompute_dependents();
        tracing::info!(
            "Dependency graph built: {} files under {}",
            self.nodes.len(),
            self.root.display()
        );
    }

    /// Replace one node after a change, then recompute all dependents.
    ///
    /// A file that no longer exists is removed from the graph.
    pub async fn update_file(&mut self, path: &Path) {
        let path = normalize_path(path);
        if tokio::fs::metadata(&path).await.is_err() {
            self.nodes.remove(&path);
        } else if syntax::is_source_file(&path) {
            self.process_file(&path).await;
        }
        self.recompute_dependents();
    }

    pub fn remove_file(&mut self, path: &Path) {
        if self.nodes.remove(&normalize_path(path)).is_some() {
            self.recompute_dependents();
        }
    }

    async fn process_file(&mut self, path: &Path) {
        let path = normalize_path(path);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Graph: cannot read {}: {}", path.display(), e);
                return;
            }
        };
        let specifiers = match syntax::extract_imports(&content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Graph: cannot parse {}: {}", path.display(), e);
                return;
            }
        };

        let mut imports = Vec::new();
        for specifier in specifiers {
            if let Some(target) = self.resolve_import(&specifier, &path).await {
                if !imports.contains(&target) {
                    imports.push(target);
                }
            }
        }

        self.nodes.insert(
            path.clone(),
            GraphNode {
                path,
                imports,
                dependents: BTreeSet::new(),
            },
        );
    }

    /// Resolve a specifier to a file, or `None` for external packages.
    async fn resolve_import(&self, specifier: &str, importer: &Path) -> Option<PathBuf> {
        let base = if specifier.starts_with('.') {
            importer.parent().unwrap_or(&self.root).join(specifier)
        } else {
            self.root.join(specifier)
        };
        let base = normalize_path(&base);

        for suffix in RESOLVE_SUFFIXES {
            let mut candidate = OsString::from(base.as_os_str());
            candidate.push(suffix);
            let candidate = PathBuf::from(candidate);
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn recompute_dependents(&mut self) {
        let mut inverse: HashMap<PathBuf, BTreeSet<PathBuf>> = HashMap::new();
        for (path, node) in &self.nodes {
            for target in &node.imports {
                inverse
                    .entry(target.clone())
                    .or_default()
                    .insert(path.clone());
            }
        }
        for (path, node) in self.nodes.iter_mut() {
            node.dependents = inverse.remove(path).unwrap_or_default();
        }
    }

    /// Files transitively depending on `path`, up to `depth` hops, in breadth-first order.
    ///
    /// The start file is only included when reached through a cycle.
    pub fn blast_radius(&self, path: &Path, depth: usize) -> Vec<PathBuf> {
        let mut affected = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(normalize_path(path), 0usize)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for dependent in &node.dependents {
                if seen.insert(dependent.clone()) {
                    affected.push(dependent.clone());
                    queue.push_back((dependent.clone(), level + 1));
                }
            }
        }
        affected
    }

    /// Imports and dependents of every node, keyed by workspace-relative path.
    pub fn summary(&self) -> BTreeMap<String, NodeSummary> {
        let rel = |p: &PathBuf| display_relative(p, &self.root);
        self.nodes
            .iter()
            .map(|(path, node)| {
                (
                    rel(path),
                    NodeSummary {
                        imports: node.imports.iter().map(rel).collect(),
                        dependents: node.dependents.iter().map(rel).collect(),
                    },
                )
            })
            .collect()
    }
}
