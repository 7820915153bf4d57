//! Keyword, vector and hybrid search with Reciprocal Rank Fusion (RRF).
//!
//! [`Retriever`] holds the injected collaborators and the ranking tunables.
//! Hybrid search joins the embedding request and the keyword lookup over an
//! oversampled candidate pool and fuses the two rankings by rank position.
//! Index lookups are synchronous and run on tokio's blocking pool.

use std::sync::Arc;

use loupe_core::traits::{ChunkStore, Embedder, KeywordIndex, VectorIndex};
use loupe_core::{
    Chunk, ChunkId, LoupeError, Neighbors, RankedResult, SearchConfig, SearchMethod,
    SearchResults,
};
use tracing::{debug, warn};

use crate::chunks;
use crate::fusion::{reciprocal_rank_fusion, RankedList};
use crate::segments::{self, Segment};
use crate::store::SqliteIndex;

/// Retrieval engine over a chunk store, two indexes and an embedding service.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use loupe_core::{EmbeddingConfig, SearchConfig};
/// use loupe_search::embedding::EmbeddingClient;
/// use loupe_search::search::Retriever;
/// use loupe_search::store::SqliteIndex;
///
/// # async fn example() {
/// let index = Arc::new(SqliteIndex::in_memory().unwrap());
/// let client = EmbeddingClient::with_config(&EmbeddingConfig::default()).unwrap();
/// let retriever = Retriever::with_index(index, Arc::new(client), SearchConfig::default()).unwrap();
/// let results = retriever.hybrid_search("simultaneous events", 5).await.unwrap();
/// let chunks = retriever.retrieve_chunks(&results.chunk_ids).unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    settings: SearchConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Build a retriever from independent collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] if `settings` fail validation.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        keyword: Arc<dyn KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        settings: SearchConfig,
    ) -> Result<Self, LoupeError> {
        settings.validate()?;
        Ok(Self {
            store,
            keyword,
            vector,
            embedder,
            settings,
        })
    }

    /// Build a retriever backed entirely by one [`SqliteIndex`].
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] if `settings` fail validation.
    pub fn with_index(
        index: Arc<SqliteIndex>,
        embedder: Arc<dyn Embedder>,
        settings: SearchConfig,
    ) -> Result<Self, LoupeError> {
        Self::new(
            index.clone(),
            index.clone(),
            index,
            embedder,
            settings,
        )
    }

    /// The ranking tunables in use.
    pub fn settings(&self) -> &SearchConfig {
        &self.settings
    }

    /// Run the search selected by `method`.
    ///
    /// # Errors
    ///
    /// See [`Retriever::keyword_search`], [`Retriever::vector_search`] and
    /// [`Retriever::hybrid_search`].
    pub async fn search(
        &self,
        method: SearchMethod,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, LoupeError> {
        match method {
            SearchMethod::Keyword => self.keyword_search(query, num_results).await,
            SearchMethod::Vector => self.vector_search(query, num_results).await,
            SearchMethod::Hybrid => self.hybrid_search(query, num_results).await,
        }
    }

    /// Lexical search. Returns fewer than `num_results` hits, possibly none,
    /// when too few chunks contain a query term.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for an empty query or
    /// `num_results == 0`; keyword index failures propagate.
    pub async fn keyword_search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, LoupeError> {
        check_request(query, num_results).map_err(|e| e.with_stage("keyword search"))?;
        let hits = self.keyword_lookup(query, num_results).await?;
        Ok(hits.into_iter().collect())
    }

    /// Embedding nearest-neighbor search. Returns exactly `num_results` hits
    /// whenever the index holds that many chunks.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for an empty query or
    /// `num_results == 0`, and [`LoupeError::Embedding`] if the embedding
    /// service fails or returns an unusable vector.
    pub async fn vector_search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, LoupeError> {
        check_request(query, num_results).map_err(|e| e.with_stage("vector search"))?;
        let embedding = self.embed(query).await?;
        let hits = self.vector_lookup(&embedding, num_results).await?;
        Ok(hits.into_iter().collect())
    }

    /// Nearest-neighbor search with a precomputed query embedding.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for `num_results == 0` and
    /// [`LoupeError::Embedding`] if the embedding is empty, non-finite, or
    /// does not match the index dimensionality.
    pub async fn vector_search_embedding(
        &self,
        embedding: &[f32],
        num_results: usize,
    ) -> Result<SearchResults, LoupeError> {
        if num_results == 0 {
            return Err(invalid_num_results().with_stage("vector search"));
        }
        self.check_embedding(embedding)?;
        let hits = self.vector_lookup(embedding, num_results).await?;
        Ok(hits.into_iter().collect())
    }

    /// Hybrid search: keyword and vector candidates fused with RRF.
    ///
    /// Each method is asked for `num_results * oversample` candidates. When the
    /// keyword side is empty the ranking falls back to the vector order.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for an empty query or
    /// `num_results == 0`; any collaborator failure fails the whole call.
    pub async fn hybrid_search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, LoupeError> {
        check_request(query, num_results).map_err(|e| e.with_stage("hybrid search"))?;
        let pool = num_results.saturating_mul(self.settings.oversample);

        let vector_fut = async {
            let embedding = self.embed(query).await?;
            self.vector_lookup(&embedding, pool).await
        };
        let keyword_fut = self.keyword_lookup(query, pool);

        let (vector_hits, keyword_hits) = tokio::try_join!(vector_fut, keyword_fut)
            .map_err(|e| e.with_stage("hybrid search"))?;

        if keyword_hits.is_empty() {
            warn!(query, "no keyword matches, hybrid ranking uses vector order only");
        }

        let fused = reciprocal_rank_fusion(
            &[
                RankedList::new(&vector_hits).weighted(self.settings.vector_weight),
                RankedList::new(&keyword_hits).weighted(self.settings.keyword_weight),
            ],
            self.settings.rrf_k,
            num_results,
        );

        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            fused = fused.len(),
            "hybrid fusion"
        );
        Ok(fused.into_iter().collect())
    }

    /// Fetch chunks for `ids`, in the same order as `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::NotFound`] if any id has no chunk.
    pub fn retrieve_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, LoupeError> {
        chunks::retrieve(self.store.as_ref(), ids).map_err(|e| e.with_stage("chunk retrieval"))
    }

    /// Expand `ids` by `neighbors`, merge overlapping windows and return the
    /// resulting segments in the configured order.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for a malformed window and
    /// [`LoupeError::NotFound`] if any id has no chunk.
    pub fn assemble_segments(
        &self,
        ids: &[ChunkId],
        neighbors: Neighbors,
    ) -> Result<Vec<Segment>, LoupeError> {
        segments::assemble(
            self.store.as_ref(),
            ids,
            neighbors,
            self.settings.segment_order,
        )
        .map_err(|e| e.with_stage("segment assembly"))
    }

    /// Like [`Retriever::assemble_segments`], rendering each segment as text
    /// joined by the configured separator.
    ///
    /// # Errors
    ///
    /// See [`Retriever::assemble_segments`].
    pub fn retrieve_segments(
        &self,
        ids: &[ChunkId],
        neighbors: Neighbors,
    ) -> Result<Vec<String>, LoupeError> {
        let separator = self.settings.segment_separator.as_str();
        Ok(self
            .assemble_segments(ids, neighbors)?
            .iter()
            .map(|segment| segment.render(separator))
            .collect())
    }

    async fn keyword_lookup(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RankedResult>, LoupeError> {
        let keyword = Arc::clone(&self.keyword);
        let query = query.to_string();
        let hits = run_blocking(move || keyword.keyword_search(&query, limit))
            .await
            .map_err(|e| e.with_stage("keyword search"))?;
        debug!(limit, hits = hits.len(), "keyword candidates");
        Ok(hits)
    }

    async fn vector_lookup(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedResult>, LoupeError> {
        let vector = Arc::clone(&self.vector);
        let embedding = embedding.to_vec();
        let hits = run_blocking(move || vector.vector_search(&embedding, limit))
            .await
            .map_err(|e| e.with_stage("vector search"))?;
        debug!(limit, hits = hits.len(), "vector candidates");
        Ok(hits)
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, LoupeError> {
        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| e.with_stage("vector search"))?;
        self.check_embedding(&embedding)?;
        Ok(embedding)
    }

    fn check_embedding(&self, embedding: &[f32]) -> Result<(), LoupeError> {
        let fail = |msg: String| Err(LoupeError::Embedding(msg).with_stage("vector search"));

        if embedding.is_empty() {
            return fail("query embedding is empty".into());
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return fail("query embedding contains non-finite values".into());
        }
        if let Some(dims) = self
            .vector
            .dimensions()
            .map_err(|e| e.with_stage("vector search"))?
        {
            if dims != embedding.len() {
                return fail(format!(
                    "query embedding has {} dimensions but the index stores {dims}",
                    embedding.len()
                ));
            }
        }
        Ok(())
    }
}

/// Run a synchronous index lookup on tokio's blocking pool.
async fn run_blocking<T, F>(lookup: F) -> Result<T, LoupeError>
where
    F: FnOnce() -> Result<T, LoupeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(lookup)
        .await
        .map_err(|e| LoupeError::Database(format!("index lookup task failed: {e}")))?
}

fn check_request(query: &str, num_results: usize) -> Result<(), LoupeError> {
    if query.trim().is_empty() {
        return Err(LoupeError::InvalidArgument(
            "query must not be empty".into(),
        ));
    }
    if num_results == 0 {
        return Err(invalid_num_results());
    }
    Ok(())
}

fn invalid_num_results() -> LoupeError {
    LoupeError::InvalidArgument("num_results must be at least 1".into())
}
