//! Chunk storage: vectors plus chunk metadata, filterable by path and searchable by
//! cosine similarity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::SemanticChunk;
use crate::syntax::ChunkKind;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS semantic_chunks (
    id TEXT PRIMARY KEY NOT NULL,
    path TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    hash TEXT NOT NULL,
    vector BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON semantic_chunks(path);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A chunk with its embedding.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: SemanticChunk,
    pub vector: Vec<f32>,
}

/// A search hit. Higher scores are closer.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: SemanticChunk,
    pub score: f32,
}

/// Persistence seam for the semantic index.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Chunk id -> content hash for every chunk stored under `path`.
    async fn hashes_for_path(&self, path: &Path) -> Result<HashMap<String, String>, StoreError>;

    /// Replace chunks by id (delete then insert).
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<(), StoreError>;

    async fn delete_ids(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Remove every chunk stored under `path`. Returns the number removed.
    async fn delete_path(&self, path: &Path) -> Result<usize, StoreError>;

    /// Nearest chunks to `vector`, best first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Cosine similarity; zero when either vector has no magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn rank(mut hits: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Non-persistent store used when no database path is configured.
#[derive(Clone, Default)]
pub struct InMemoryChunkStore {
    chunks: Arc<RwLock<HashMap<String, StoredChunk>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn hashes_for_path(&self, path: &Path) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .chunks
            .read()
            .await
            .values()
            .filter(|c| c.chunk.path == path)
            .map(|c| (c.chunk.id.clone(), c.chunk.hash.clone()))
            .collect())
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<(), StoreError> {
        let mut map = self.chunks.write().await;
        for stored in chunks {
            map.insert(stored.chunk.id.clone(), stored);
        }
        Ok(())
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut map = self.chunks.write().await;
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }

    async fn delete_path(&self, path: &Path) -> Result<usize, StoreError> {
        let mut map = self.chunks.write().await;
        let before = map.len();
        map.retain(|_, c| c.chunk.path != path);
        Ok(before - map.len())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let hits = self
            .chunks
            .read()
            .await
            .values()
            .map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                score: cosine_similarity(vector, &c.vector),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.chunks.read().await.len())
    }
}

/// SQLite-backed store. Vectors are little-endian f32 blobs.
pub struct SqliteChunkStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChunkStore {
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn hashes_for_path(&self, path: &Path) -> Result<HashMap<String, String>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = path_key(path);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT id, hash FROM semantic_chunks WHERE path = ?1")?;
            let rows = stmt.query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = HashMap::new();
            for row in rows {
                let (id, hash) = row?;
                out.insert(id, hash);
            }
            Ok::<_, StoreError>(out)
        })
        .await?
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            for stored in &chunks {
                let c = &stored.chunk;
                tx.execute("DELETE FROM semantic_chunks WHERE id = ?1", params![c.id])?;
                tx.execute(
                    "INSERT INTO semantic_chunks (id, path, kind, name, content, start_line, end_line, hash, vector)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        c.id,
                        path_key(&c.path),
                        c.kind.as_str(),
                        c.name,
                        c.text,
                        c.start_line as i64,
                        c.end_line as i64,
                        c.hash,
                        encode_vector(&stored.vector),
                    ],
                )?;
            }
            tx.commit()?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            for id in &ids {
                conn.execute("DELETE FROM semantic_chunks WHERE id = ?1", params![id])?;
            }
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn delete_path(&self, path: &Path) -> Result<usize, StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = path_key(path);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let removed = conn.execute("DELETE FROM semantic_chunks WHERE path = ?1", params![key])?;
            Ok::<_, StoreError>(removed)
        })
        .await?
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let query = vector.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, path, kind, name, content, start_line, end_line, hash, vector
                 FROM semantic_chunks",
            )?;
            let rows = stmt.query_map([], |row| {
                let kind: String = row.get(2)?;
                let blob: Vec<u8> = row.get(8)?;
                let chunk = SemanticChunk {
                    id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    kind: kind.parse().unwrap_or(ChunkKind::Other),
                    name: row.get(3)?,
                    text: row.get(4)?,
                    start_line: row.get::<_, i64>(5)? as usize,
                    end_line: row.get::<_, i64>(6)? as usize,
                    hash: row.get(7)?,
                };
                Ok(ScoredChunk {
                    score: cosine_similarity(&query, &decode_vector(&blob)),
                    chunk,
                })
            })?;
            let mut hits = Vec::new();
            for row in rows {
                hits.push(row?);
            }
            Ok::<_, StoreError>(rank(hits, limit))
        })
        .await?
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM semantic_chunks", [], |row| row.get(0))?;
            Ok::<_, StoreError>(count as usize)
        })
        .await?
    }
}
