//! Workspace layout and bootstrap.
//!
//! A workspace is the project directory the agent operates on. Opening it wires up the
//! dependency graph, the optional semantic index and the file watcher; loading it builds
//! the project manifest that is fed to the model as context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, RwLock};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::graph::{CodeGraph, SharedGraph};
use crate::index::{
    spawn_watcher, ChunkStore, EmbeddingClient, InMemoryChunkStore, SemanticIndex,
    SqliteChunkStore, StoreError, WatchHandle, DEFAULT_FLUSH_INTERVAL,
};
use crate::syntax;
use crate::util::{display_relative, normalize_path};

/// Directories left out of the manifest and text search.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "dist-electron",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    "coverage",
    ".idea",
    ".vscode",
    "build",
    "out",
    "bin",
    "obj",
];

/// Directories left out of the dependency graph and semantic index. Narrower than
/// [`SKIP_DIRS`]: `bin/` or `out/` can hold real sources in a TS project.
pub const SOURCE_SKIP_DIRS: &[&str] = &["node_modules", ".git", "dist", "dist-electron", "build"];

/// Extensions treated as binary without looking at content.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "webp", "svg", "woff", "woff2", "ttf", "eot", "mp3",
    "mp4", "zip", "tar", "gz", "exe", "dll", "so", "dylib", "lock", "pdf", "bin", "pyc", "node",
];

/// Files at or above this size are left out of the manifest and text search.
pub const MAX_TEXT_FILE_BYTES: u64 = 100_000;

/// Upper bound on manifest entries.
pub const MANIFEST_MAX_FILES: usize = 2000;

pub fn is_skipped_source_dir(name: &str) -> bool {
    SOURCE_SKIP_DIRS.contains(&name)
}

pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Whether the first KiB of a file contains a NUL byte.
pub async fn is_binary_file(path: &Path) -> std::io::Result<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; 1024];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].contains(&0))
}

/// Walk `root`, pruning `skip_dirs` (and dot directories when `skip_hidden`).
pub(crate) fn walk(
    root: &Path,
    skip_dirs: &'static [&'static str],
    skip_hidden: bool,
) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(skip_dirs.iter().any(|d| name == *d) || (skip_hidden && name.starts_with('.')))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Every source file the grammar understands.
pub fn source_files(root: &Path) -> Vec<PathBuf> {
    walk(root, SOURCE_SKIP_DIRS, false)
        .map(|e| normalize_path(e.path()))
        .filter(|p| syntax::is_source_file(p))
        .collect()
}

/// Readable text files for the manifest: no dot directories, no binaries, under 100 KB.
pub async fn manifest_files(root: &Path, max_files: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in walk(root, SKIP_DIRS, true) {
        if files.len() >= max_files {
            break;
        }
        let path = entry.path();
        if has_binary_extension(path) {
            continue;
        }
        let small = entry
            .metadata()
            .map(|m| m.len() < MAX_TEXT_FILE_BYTES)
            .unwrap_or(false);
        if !small {
            continue;
        }
        if matches!(is_binary_file(path).await, Ok(false)) {
            files.push(path.to_path_buf());
        }
    }
    files
}

/// Render the project manifest shown to the model.
pub fn render_manifest(root: &Path, files: &[PathBuf]) -> String {
    let mut manifest = format!(
        "## PROJECT MANIFEST\n\n### Root: {}\n\n#### Directory Structure (File List):\n",
        root.display()
    );
    let listing: Vec<String> = files
        .iter()
        .map(|f| format!("- {}", display_relative(f, root)))
        .collect();
    manifest.push_str(&listing.join("\n"));
    manifest.push_str("\n\n#### Critical Metadata:\n(Use read_file to access full contents)\n");
    manifest
}

/// Result of the first-task workspace load.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceContext {
    /// None when the workspace had no readable files
    pub manifest: Option<String>,
    pub file_count: usize,
}

/// Services bound to one workspace directory.
pub struct Workspace {
    root: PathBuf,
    graph: SharedGraph,
    index: Option<Arc<SemanticIndex>>,
    watch: bool,
    watcher: Mutex<Option<WatchHandle>>,
}

impl Workspace {
    /// A workspace with an empty graph and the given index; nothing is scanned yet.
    pub fn new(root: impl Into<PathBuf>, index: Option<Arc<SemanticIndex>>) -> Self {
        let root = normalize_path(&root.into());
        Self {
            graph: Arc::new(RwLock::new(CodeGraph::new(&root))),
            root,
            index,
            watch: false,
            watcher: Mutex::new(None),
        }
    }

    /// Open a workspace using the index configuration: the semantic index is enabled
    /// only when an embedding key is present.
    pub async fn open(root: impl Into<PathBuf>, config: &IndexConfig) -> Result<Self, StoreError> {
        let index = match config.embed_api_key.as_deref() {
            Some(key) if config.is_enabled() => {
                let store: Arc<dyn ChunkStore> = match &config.db_path {
                    Some(path) => Arc::new(SqliteChunkStore::open(path.clone()).await?),
                    None => Arc::new(InMemoryChunkStore::new()),
                };
                let embedder = Arc::new(EmbeddingClient::new(
                    key.to_string(),
                    config.embed_model.clone(),
                    config.embed_url.clone(),
                ));
                tracing::info!(
                    "Semantic index enabled: model {}, store {}",
                    embedder.model(),
                    config
                        .db_path
                        .as_ref()
                        .map_or_else(|| "in memory".to_string(), |p| p.display().to_string())
                );
                Some(Arc::new(SemanticIndex::new(store, embedder)))
            }
            _ => None,
        };
        let mut workspace = Self::new(root, index);
        workspace.watch = config.watch;
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn index(&self) -> Option<&Arc<SemanticIndex>> {
        self.index.as_ref()
    }

    /// Build the manifest, rebuild the graph, index every source file and start watching.
    ///
    /// Indexing failures are logged, not returned: the agent can work without the index.
    pub async fn load(&self) -> WorkspaceContext {
        tracing::info!("Building workspace context for {}", self.root.display());

        let files = manifest_files(&self.root, MANIFEST_MAX_FILES).await;
        let manifest = (!files.is_empty()).then(|| render_manifest(&self.root, &files));

        self.graph.write().await.rebuild().await;

        if let Some(index) = &self.index {
            let sources = source_files(&self.root);
            if let Err(e) = index.index_files(&sources).await {
                tracing::warn!("Semantic indexing stopped: {}", e);
            }
            match index.store().len().await {
                Ok(chunks) => tracing::info!("Semantic index holds {} chunks", chunks),
                Err(e) => tracing::warn!("Semantic index size unavailable: {}", e),
            }
        }

        if self.watch {
            self.start_watching().await;
        }

        WorkspaceContext {
            manifest,
            file_count: files.len(),
        }
    }

    async fn start_watching(&self) {
        let mut slot = self.watcher.lock().await;
        if slot.is_some() {
            return;
        }
        match spawn_watcher(
            self.root.clone(),
            self.index.clone(),
            Arc::clone(&self.graph),
            DEFAULT_FLUSH_INTERVAL,
        ) {
            Ok(handle) => *slot = Some(handle),
            Err(e) => tracing::warn!("File watcher not started: {}", e),
        }
    }

    /// Stop the file watcher, if running.
    pub async fn stop_watching(&self) {
        self.watcher.lock().await.take();
    }
}
