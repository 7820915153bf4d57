//! SQLite + FTS5 storage for chunks and embeddings.
//!
//! One database backs all three collaborators the retrieval core consumes:
//! the chunk store (plain table addressed by id and by `(document_id,
//! chunk_index)`), the keyword index (FTS5 virtual table kept in sync by
//! triggers), and the vector index (little-endian `f32` BLOBs scored by
//! cosine similarity in Rust).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use loupe_core::traits::{ChunkStore, KeywordIndex, VectorIndex};
use loupe_core::{Chunk, ChunkId, LoupeError, RankedResult};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Maximum number of bound parameters per `IN (...)` lookup.
const ID_BATCH: usize = 500;

/// Index statistics.
///
/// # Examples
///
/// ```
/// use loupe_search::store::IndexStats;
///
/// let stats = IndexStats {
///     total_chunks: 100,
///     total_documents: 10,
///     embedding_dimensions: Some(1536),
///     index_size_bytes: 50000,
/// };
/// assert_eq!(stats.total_chunks, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Total number of chunks in the index.
    pub total_chunks: usize,
    /// Total number of documents.
    pub total_documents: usize,
    /// Dimensionality of the stored embeddings, once known.
    pub embedding_dimensions: Option<usize>,
    /// Size of the index database in bytes.
    pub index_size_bytes: u64,
}

/// SQLite-based chunk store with FTS5 keyword search and BLOB-stored embeddings.
///
/// # Examples
///
/// ```
/// use loupe_search::store::SqliteIndex;
///
/// let index = SqliteIndex::in_memory().unwrap();
/// let stats = index.stats().unwrap();
/// assert_eq!(stats.total_chunks, 0);
/// ```
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex").finish_non_exhaustive()
    }
}

impl SqliteIndex {
    /// Open or create an index database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use loupe_search::store::SqliteIndex;
    ///
    /// let index = SqliteIndex::open(Path::new(".loupe/index.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, LoupeError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LoupeError::Database(format!("failed to create index directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| LoupeError::Database(format!("failed to open database: {e}")))?;

        let index = Self {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Create an in-memory index (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, LoupeError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LoupeError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let index = Self {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LoupeError> {
        self.conn
            .lock()
            .map_err(|_| LoupeError::Database("index connection lock poisoned".into()))
    }

    fn init_schema(&self) -> Result<(), LoupeError> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    num_chunks INTEGER NOT NULL,
                    ingested_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    document_id TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB,
                    UNIQUE (document_id, chunk_index),
                    FOREIGN KEY (document_id) REFERENCES documents(id)
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                    content,
                    content='chunks', content_rowid='seq',
                    tokenize='porter unicode61'
                );

                -- Triggers to keep FTS in sync
                CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                    INSERT INTO chunks_fts(rowid, content) VALUES (new.seq, new.content);
                END;

                CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                    INSERT INTO chunks_fts(chunks_fts, rowid, content)
                    VALUES ('delete', old.seq, old.content);
                END;

                CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                    INSERT INTO chunks_fts(chunks_fts, rowid, content)
                    VALUES ('delete', old.seq, old.content);
                    INSERT INTO chunks_fts(rowid, content) VALUES (new.seq, new.content);
                END;
                ",
            )
            .map_err(|e| LoupeError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Store embedding dimensions in the metadata table.
    ///
    /// If dimensions are already stored and match, this is a no-op.
    /// If they don't match, returns an error suggesting re-ingestion.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] if dimensions conflict with
    /// an existing index.
    pub fn set_dimensions(&self, dimensions: usize) -> Result<(), LoupeError> {
        let conn = self.conn()?;
        set_dimensions(&conn, dimensions)
    }

    /// Get embedding dimensions stored in metadata, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] on query failure.
    pub fn get_dimensions(&self) -> Result<Option<usize>, LoupeError> {
        let conn = self.conn()?;
        get_dimensions(&conn)
    }

    /// Store a document as an ordered list of `(content, embedding)` chunks.
    ///
    /// Chunk `i` of the list gets `chunk_index = i` and the identifier
    /// [`chunk_id`]`(document_id, i)`. Any previous version of the document is
    /// replaced atomically.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for an empty document id or an
    /// empty chunk list, and [`LoupeError::Database`] on write failure or an
    /// embedding dimension conflict.
    ///
    /// # Examples
    ///
    /// ```
    /// use loupe_search::store::SqliteIndex;
    ///
    /// let index = SqliteIndex::in_memory().unwrap();
    /// let chunks = index
    ///     .insert_document(
    ///         "notes",
    ///         &[
    ///             ("first paragraph".to_string(), vec![1.0, 0.0]),
    ///             ("second paragraph".to_string(), vec![0.0, 1.0]),
    ///         ],
    ///     )
    ///     .unwrap();
    /// assert_eq!(chunks.len(), 2);
    /// assert_eq!(chunks[1].index, 1);
    /// ```
    pub fn insert_document(
        &self,
        document_id: &str,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<Vec<Chunk>, LoupeError> {
        if document_id.is_empty() {
            return Err(LoupeError::InvalidArgument(
                "document id must not be empty".into(),
            ));
        }
        if chunks.is_empty() {
            return Err(LoupeError::InvalidArgument(format!(
                "document '{document_id}' has no chunks"
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoupeError::Database(format!("failed to begin transaction: {e}")))?;

        if let Some((_, first)) = chunks.first() {
            let dimensions = first.len();
            if let Some(index) = chunks.iter().position(|(_, e)| e.len() != dimensions) {
                return Err(LoupeError::Database(format!(
                    "document '{document_id}' chunk {index} has {} dimensions but chunk 0 has {dimensions}",
                    chunks[index].1.len()
                )));
            }
            set_dimensions(&tx, dimensions)?;
        }

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(|e| LoupeError::Database(format!("failed to delete old chunks: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO documents (id, num_chunks, ingested_at) VALUES (?1, ?2, ?3)",
            params![document_id, chunks.len() as i64, unix_now()],
        )
        .map_err(|e| LoupeError::Database(format!("failed to record document: {e}")))?;

        let mut stored = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO chunks (id, document_id, chunk_index, content, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| LoupeError::Database(format!("failed to prepare insert: {e}")))?;

            for (index, (content, embedding)) in chunks.iter().enumerate() {
                let id = chunk_id(document_id, index);
                stmt.execute(params![
                    id,
                    document_id,
                    index as i64,
                    content,
                    floats_to_bytes(embedding),
                ])
                .map_err(|e| LoupeError::Database(format!("failed to insert chunk: {e}")))?;
                stored.push(Chunk {
                    id,
                    document_id: document_id.to_string(),
                    index,
                    content: content.clone(),
                });
            }
        }

        tx.commit()
            .map_err(|e| LoupeError::Database(format!("failed to commit document: {e}")))?;

        info!(document_id, chunks = stored.len(), "stored document");
        Ok(stored)
    }

    /// Remove a document and all of its chunks.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] on delete failure.
    pub fn remove_document(&self, document_id: &str) -> Result<(), LoupeError> {
        let conn = self.conn()?;

        conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(|e| LoupeError::Database(format!("failed to delete chunks: {e}")))?;

        conn.execute("DELETE FROM documents WHERE id = ?1", params![document_id])
            .map_err(|e| LoupeError::Database(format!("failed to delete document: {e}")))?;

        Ok(())
    }

    /// Get all document identifiers, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] on query failure.
    pub fn documents(&self) -> Result<Vec<String>, LoupeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM documents ORDER BY id")
            .map_err(|e| LoupeError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| LoupeError::Database(format!("failed to query documents: {e}")))?;

        let mut ids = Vec::new();
        for row in rows {
            let id: String =
                row.map_err(|e| LoupeError::Database(format!("failed to read row: {e}")))?;
            ids.push(id);
        }

        Ok(ids)
    }

    /// Get index statistics.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use loupe_search::store::SqliteIndex;
    ///
    /// let index = SqliteIndex::in_memory().unwrap();
    /// let stats = index.stats().unwrap();
    /// assert_eq!(stats.total_chunks, 0);
    /// assert_eq!(stats.total_documents, 0);
    /// assert_eq!(stats.embedding_dimensions, None);
    /// ```
    pub fn stats(&self) -> Result<IndexStats, LoupeError> {
        let conn = self.conn()?;

        let total_chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| LoupeError::Database(format!("failed to count chunks: {e}")))?;

        let total_documents: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| LoupeError::Database(format!("failed to count documents: {e}")))?;

        // For in-memory databases, page_count returns a small number
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(IndexStats {
            total_chunks: total_chunks as usize,
            total_documents: total_documents as usize,
            embedding_dimensions: get_dimensions(&conn)?,
            index_size_bytes: (page_count * page_size) as u64,
        })
    }
}

impl ChunkStore for SqliteIndex {
    fn chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, LoupeError> {
        let conn = self.conn()?;
        let mut chunks = Vec::with_capacity(ids.len());

        for batch in ids.chunks(ID_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT id, document_id, chunk_index, content FROM chunks WHERE id IN ({placeholders})"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LoupeError::Database(format!("failed to prepare lookup: {e}")))?;

            let rows = stmt
                .query_map(params_from_iter(batch.iter()), row_to_chunk)
                .map_err(|e| LoupeError::Database(format!("failed to look up chunks: {e}")))?;

            for row in rows {
                chunks.push(
                    row.map_err(|e| LoupeError::Database(format!("failed to read row: {e}")))?,
                );
            }
        }

        Ok(chunks)
    }

    fn document_len(&self, document_id: &str) -> Result<usize, LoupeError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(|e| LoupeError::Database(format!("failed to count document chunks: {e}")))?;
        Ok(count as usize)
    }

    fn chunks_in_range(
        &self,
        document_id: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Chunk>, LoupeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, chunk_index, content FROM chunks
                 WHERE document_id = ?1 AND chunk_index BETWEEN ?2 AND ?3
                 ORDER BY chunk_index",
            )
            .map_err(|e| LoupeError::Database(format!("failed to prepare range query: {e}")))?;

        let rows = stmt
            .query_map(params![document_id, start as i64, end as i64], row_to_chunk)
            .map_err(|e| LoupeError::Database(format!("failed to query range: {e}")))?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(|e| LoupeError::Database(format!("failed to read row: {e}")))?);
        }
        Ok(chunks)
    }
}

impl KeywordIndex for SqliteIndex {
    /// Full-text keyword search via FTS5, scored by negated BM25 rank.
    fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<RankedResult>, LoupeError> {
        let safe_query = sanitize_fts_query(query);
        if safe_query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, rank
                 FROM chunks_fts f
                 JOIN chunks c ON c.seq = f.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY rank, c.seq
                 LIMIT ?2",
            )
            .map_err(|e| LoupeError::Database(format!("failed to prepare FTS query: {e}")))?;

        let rows = stmt
            .query_map(params![safe_query, limit as i64], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // FTS5 rank is negative (more negative = more relevant), convert to positive score
                Ok(RankedResult::new(id, (-rank).max(0.0)))
            })
            .map_err(|e| LoupeError::Database(format!("FTS query failed: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(
                row.map_err(|e| LoupeError::Database(format!("failed to read FTS row: {e}")))?,
            );
        }

        debug!(query, hits = hits.len(), "keyword index lookup");
        Ok(hits)
    }
}

impl VectorIndex for SqliteIndex {
    /// Exhaustive cosine similarity over every stored embedding.
    fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedResult>, LoupeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL ORDER BY seq")
            .map_err(|e| LoupeError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })
            .map_err(|e| LoupeError::Database(format!("failed to query embeddings: {e}")))?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, bytes) =
                row.map_err(|e| LoupeError::Database(format!("failed to read row: {e}")))?;
            let score = cosine_similarity(embedding, &bytes_to_floats(&bytes));
            scored.push(RankedResult::new(id, score));
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    fn dimensions(&self) -> Result<Option<usize>, LoupeError> {
        self.get_dimensions()
    }
}

/// Deterministic chunk identifier for `(document_id, index)`.
///
/// # Examples
///
/// ```
/// use loupe_search::store::chunk_id;
///
/// let id = chunk_id("relativity", 3);
/// assert_eq!(id.len(), 32);
/// assert_eq!(id, chunk_id("relativity", 3));
/// assert_ne!(id, chunk_id("relativity", 4));
/// ```
pub fn chunk_id(document_id: &str, index: usize) -> ChunkId {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let index: i64 = row.get(2)?;
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        index: index as usize,
        content: row.get(3)?,
    })
}

fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>, LoupeError> {
    let result = conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(LoupeError::Database(format!(
            "failed to get metadata '{key}': {e}"
        ))),
    }
}

fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), LoupeError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| LoupeError::Database(format!("failed to set metadata '{key}': {e}")))?;
    Ok(())
}

fn get_dimensions(conn: &Connection) -> Result<Option<usize>, LoupeError> {
    match get_metadata(conn, "embedding_dimensions")? {
        Some(v) => {
            let dims: usize = v.parse().map_err(|_| {
                LoupeError::Database(format!("Corrupted dimension metadata in index: '{v}'"))
            })?;
            Ok(Some(dims))
        }
        None => Ok(None),
    }
}

fn set_dimensions(conn: &Connection, dimensions: usize) -> Result<(), LoupeError> {
    if let Some(stored) = get_dimensions(conn)? {
        if stored != dimensions {
            return Err(LoupeError::Database(format!(
                "Index was created with {stored} dimensions but got {dimensions}. \
                 Re-ingest into a fresh index to change embedding models."
            )));
        }
        return Ok(());
    }

    set_metadata(conn, "embedding_dimensions", &dimensions.to_string())
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

fn sanitize_fts_query(query: &str) -> String {
    // Split where unicode61 splits, then quote so FTS5 operators are plain text
    let words: Vec<String> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect();
    words.join(" OR ")
}

fn unix_now() -> i64 {
    use std::time::SystemTime;
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
