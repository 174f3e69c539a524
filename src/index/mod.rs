//! Semantic code index.
//!
//! Source files are split into definition chunks (classes, functions, arrow-function
//! constants, methods). Each chunk is content-addressed by `path:start_line` plus a hash
//! of its own text, so re-indexing only embeds what actually changed:
//!
//! - whole-file hash unchanged since the last pass: skip the file entirely
//! - chunk hash unchanged in the store: leave it alone
//! - new or changed chunk: embed in one batch, then upsert
//! - chunk in the store but no longer in the file: delete

mod embed;
mod store;
mod watcher;

pub use embed::{Embedder, EmbeddingClient};
pub use store::{
    cosine_similarity, ChunkStore, InMemoryChunkStore, ScoredChunk, SqliteChunkStore,
    StoreError, StoredChunk,
};
pub use watcher::{spawn_watcher, WatchHandle, DEFAULT_FLUSH_INTERVAL};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::llm::LlmError;
use crate::syntax::{self, ChunkKind, SyntaxError};
use crate::util::normalize_path;

/// Default embeddings endpoint.
pub const VOYAGE_EMBEDDINGS_URL: &str = "https://api.voyageai.com/v1/embeddings";

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("chunk store failed: {0}")]
    Store(#[from] StoreError),

    #[error("cannot parse {path}: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding backend returned {got} vectors for {expected} chunks")]
    EmbeddingCount { expected: usize, got: usize },
}

/// A named, line-ranged unit of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticChunk {
    /// `path:start_line`
    pub id: String,
    pub path: PathBuf,
    pub kind: ChunkKind,
    pub name: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    /// sha256 of `text`, hex
    pub hash: String,
}

/// Hex sha256 of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Split a source file into chunks.
///
/// Two definitions starting on the same line share an id; the outermost one wins.
pub fn chunk_file(path: &Path, content: &str) -> Result<Vec<SemanticChunk>, SyntaxError> {
    let mut seen = HashSet::new();
    let chunks = syntax::extract_definitions(content)?
        .into_iter()
        .filter_map(|def| {
            let id = format!("{}:{}", path.display(), def.start_line);
            if !seen.insert(id.clone()) {
                return None;
            }
            Some(SemanticChunk {
                id,
                path: path.to_path_buf(),
                kind: def.kind,
                name: def.name,
                hash: content_hash(&def.text),
                text: def.text,
                start_line: def.start_line,
                end_line: def.end_line,
            })
        })
        .collect();
    Ok(chunks)
}

/// What one per-file pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// The whole-file hash matched and nothing was examined
    pub skipped: bool,
    pub embedded: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Incremental semantic index over one workspace.
pub struct SemanticIndex {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    /// path -> last indexed whole-file hash
    file_hashes: Mutex<HashMap<PathBuf, String>>,
}

impl SemanticIndex {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            file_hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Reconcile the store with the current content of one file.
    pub async fn index_file(&self, path: &Path) -> Result<IndexReport, IndexError> {
        let path = normalize_path(path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
        let file_hash = content_hash(&content);

        if self.file_hashes.lock().await.get(&path) == Some(&file_hash) {
            return Ok(IndexReport {
                skipped: true,
                ..Default::default()
            });
        }

        let chunks = chunk_file(&path, &content).map_err(|source| IndexError::Syntax {
            path: path.clone(),
            source,
        })?;
        let existing = self.store.hashes_for_path(&path).await?;

        let (changed, unchanged): (Vec<SemanticChunk>, Vec<SemanticChunk>) = chunks
            .iter()
            .cloned()
            .partition(|c| existing.get(&c.id) != Some(&c.hash));

        if !changed.is_empty() {
            let texts: Vec<String> = changed.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != changed.len() {
                return Err(IndexError::EmbeddingCount {
                    expected: changed.len(),
                    got: vectors.len(),
                });
            }
            let stored = changed
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| StoredChunk { chunk, vector })
                .collect();
            self.store.upsert(stored).await?;
        }

        let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let vanished: Vec<String> = existing
            .keys()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();
        self.store.delete_ids(&vanished).await?;

        self.file_hashes.lock().await.insert(path.clone(), file_hash);

        let report = IndexReport {
            skipped: false,
            embedded: changed.len(),
            unchanged: unchanged.len(),
            deleted: vanished.len(),
        };
        tracing::debug!(
            "Indexed {}: {} embedded, {} unchanged, {} deleted",
            path.display(),
            report.embedded,
            report.unchanged,
            report.deleted
        );
        Ok(report)
    }

    /// Index every file, continuing past per-file failures.
    ///
    /// Backend failures abort the pass since every later file would fail the same way.
    pub async fn index_files(&self, paths: &[PathBuf]) -> Result<usize, IndexError> {
        let mut indexed = 0;
        for path in paths {
            match self.index_file(path).await {
                Ok(_) => indexed += 1,
                Err(IndexError::Backend(e)) => return Err(IndexError::Backend(e)),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        tracing::info!("Semantic index: {} of {} files indexed", indexed, paths.len());
        Ok(indexed)
    }

    /// Forget a deleted file.
    pub async fn remove_file(&self, path: &Path) -> Result<usize, IndexError> {
        let path = normalize_path(path);
        self.file_hashes.lock().await.remove(&path);
        Ok(self.store.delete_path(&path).await?)
    }

    /// Top `limit` chunks for a natural-language query.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.store.search(&vector, limit).await?)
    }
}
