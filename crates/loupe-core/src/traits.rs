//! Capabilities the retrieval core consumes but does not implement.
//!
//! The chunk store, both indexes and the embedding service are injected as
//! trait objects so fusion and segment assembly can run against any backend,
//! including deterministic in-memory stubs.

use async_trait::async_trait;

use crate::error::LoupeError;
use crate::types::{Chunk, ChunkId, RankedResult};

/// Document-scoped, index-addressable chunk records.
pub trait ChunkStore: Send + Sync {
    /// Fetch chunks for `ids` in a single batch.
    ///
    /// Order of the returned chunks is unspecified; identifiers without a
    /// chunk are simply absent.
    fn chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, LoupeError>;

    /// Number of chunks in `document_id` (0 for an unknown document).
    fn document_len(&self, document_id: &str) -> Result<usize, LoupeError>;

    /// Chunks of `document_id` with `start <= index <= end`, ascending.
    fn chunks_in_range(
        &self,
        document_id: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Chunk>, LoupeError>;
}

/// Term-based scored lookup over chunk identifiers.
pub trait KeywordIndex: Send + Sync {
    /// Top-`limit` lexical matches, best first.
    ///
    /// Returns an empty list when no chunk contains a query term.
    fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<RankedResult>, LoupeError>;
}

/// Nearest-neighbor lookup over chunk embeddings.
pub trait VectorIndex: Send + Sync {
    /// Top-`limit` most similar chunks, best first.
    ///
    /// Returns `min(limit, indexed chunks)` results.
    fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedResult>, LoupeError>;

    /// Dimensionality of the stored embeddings, if known.
    fn dimensions(&self) -> Result<Option<usize>, LoupeError>;
}

/// External embedding service.
///
/// Failures surface as [`LoupeError::Embedding`]; implementations do not
/// retry on behalf of the caller.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a search query.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, LoupeError>;

    /// Embed documents, returning one vector per input in the same order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LoupeError>;
}
