//! Client for OpenAI-compatible `/embeddings` endpoints.
//!
//! Documents are embedded in batches of `embedding.batch_size`; queries are
//! embedded one at a time. Every response is validated before it reaches the
//! vector index: one vector per input, each non-empty, finite, and of the
//! configured dimensionality.

use std::time::Duration;

use async_trait::async_trait;
use loupe_core::traits::Embedder;
use loupe_core::{EmbeddingConfig, LoupeError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for an OpenAI-compatible embedding API.
///
/// # Examples
///
/// ```
/// use loupe_core::EmbeddingConfig;
/// use loupe_search::embedding::EmbeddingClient;
///
/// let config = EmbeddingConfig {
///     api_key: Some("test-key".into()),
///     ..EmbeddingConfig::default()
/// };
/// let client = EmbeddingClient::with_config(&config).unwrap();
/// assert_eq!(client.model(), "text-embedding-3-small");
/// ```
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

const BATCH_DELAY_MS: u64 = 200;

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// The API key comes from `embedding.api_key`, then `LOUPE_API_KEY`, then
    /// `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Config`] if no API key is available, the provider
    /// is unsupported, or the HTTP client cannot be built.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, LoupeError> {
        Self::build(config, config.resolve_api_key())
    }

    fn build(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self, LoupeError> {
        if config.provider != "openai" {
            return Err(LoupeError::Config(format!(
                "unsupported embedding provider '{}': only OpenAI-compatible endpoints (provider = \"openai\") are supported",
                config.provider
            )));
        }
        if config.batch_size == 0 {
            return Err(LoupeError::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if config.dimensions == 0 {
            return Err(LoupeError::Config(
                "embedding.dimensions must be at least 1".into(),
            ));
        }

        let api_key = api_key.ok_or_else(|| {
            LoupeError::Config(
                "embedding API key not found: set embedding.api_key in .loupe.toml or LOUPE_API_KEY / OPENAI_API_KEY env var".into(),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LoupeError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size,
        })
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Dimensionality every returned vector must have.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a batch of texts. Returns vectors in the same order.
    ///
    /// Splits into sub-batches of `batch_size` with 200ms delays for rate
    /// limiting.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Embedding`] if the API call fails or returns
    /// malformed vectors.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loupe_core::EmbeddingConfig;
    /// use loupe_search::embedding::EmbeddingClient;
    ///
    /// # async fn example() {
    /// let client = EmbeddingClient::with_config(&EmbeddingConfig::default()).unwrap();
    /// let texts = vec!["Two events are simultaneous.".to_string()];
    /// let embeddings = client.embed_batch(&texts).await.unwrap();
    /// assert_eq!(embeddings.len(), 1);
    /// # }
    /// ```
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LoupeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            debug!(batch = i, size = batch.len(), "embedding batch");
            all_embeddings.extend(self.request(batch).await?);
        }

        Ok(all_embeddings)
    }

    /// Embed a single query.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Embedding`] if the API call fails or returns a
    /// malformed vector.
    pub async fn embed_single(&self, query: &str) -> Result<Vec<f32>, LoupeError> {
        let mut vectors = self.request(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LoupeError::Embedding("empty response from embedding API".into()))
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LoupeError> {
        let request = self.build_request(texts);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LoupeError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(LoupeError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LoupeError::Embedding(format!("failed to parse response: {e}")))?;

        self.validate(embed_response, texts.len())
    }

    fn build_request(&self, texts: &[String]) -> EmbedRequest {
        // Only the text-embedding-3 family accepts a dimensions override.
        let dimensions = self
            .model
            .starts_with("text-embedding-3")
            .then_some(self.dimensions);
        EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            dimensions,
        }
    }

    fn validate(
        &self,
        response: EmbedResponse,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, LoupeError> {
        if response.data.len() != expected {
            return Err(LoupeError::Embedding(format!(
                "expected {expected} embeddings, got {}",
                response.data.len()
            )));
        }

        let mut items = response.data;
        if items.iter().all(|item| item.index.is_some()) {
            items.sort_by_key(|item| item.index);
        }

        let mut vectors = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            if item.embedding.is_empty() {
                return Err(LoupeError::Embedding(format!("embedding {i} is empty")));
            }
            if item.embedding.len() != self.dimensions {
                return Err(LoupeError::Embedding(format!(
                    "embedding {i} has {} dimensions, expected {}",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
            if item.embedding.iter().any(|x| !x.is_finite()) {
                return Err(LoupeError::Embedding(format!(
                    "embedding {i} contains non-finite values"
                )));
            }
            vectors.push(item.embedding);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, LoupeError> {
        self.embed_single(query).await
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LoupeError> {
        self.embed_batch(texts).await
    }
}
