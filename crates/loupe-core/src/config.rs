use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoupeError;
use crate::types::SegmentOrder;

/// Top-level configuration loaded from `.loupe.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
///
/// # Examples
///
/// ```
/// use loupe_core::LoupeConfig;
///
/// let config = LoupeConfig::default();
/// assert_eq!(config.search.oversample, 4);
/// assert_eq!(config.search.rrf_k, 60.0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoupeConfig {
    /// Where the SQLite index lives.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Ranking and segment tunables.
    #[serde(default)]
    pub search: SearchConfig,
}

impl LoupeConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::FileNotFound`] if the file does not exist,
    /// [`LoupeError::Io`] if it cannot be read, or [`LoupeError::Toml`] if the
    /// content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loupe_core::LoupeConfig;
    /// use std::path::Path;
    ///
    /// let config = LoupeConfig::from_file(Path::new(".loupe.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, LoupeError> {
        if !path.exists() {
            return Err(LoupeError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::Toml`] if parsing fails, or
    /// [`LoupeError::InvalidArgument`] if the search tunables are out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use loupe_core::LoupeConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// oversample = 8
    /// "#;
    /// let config = LoupeConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.oversample, 8);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, LoupeError> {
        let config: Self = toml::from_str(content)?;
        config.search.validate()?;
        Ok(config)
    }
}

/// Location of the SQLite chunk/keyword/vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the index file (default: `.loupe/index.db`).
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".loupe/index.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Configuration for the embedding provider used by vector search.
///
/// # Examples
///
/// ```
/// use loupe_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "openai");
/// assert_eq!(config.model, "text-embedding-3-small");
/// assert_eq!(config.dimensions, 1536);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider (default: `"openai"`). Any OpenAI-compatible
    /// `/embeddings` endpoint works.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key. Falls back to `LOUPE_API_KEY`, then `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Model name (default: `"text-embedding-3-small"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL of the provider (default: `https://api.openai.com/v1`).
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Embedding dimensions (default: 1536).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per request when embedding documents (default: 64).
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    64
}

fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("LOUPE_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Ranking tunables for hybrid search and segment assembly.
///
/// # Examples
///
/// ```
/// use loupe_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.oversample, 4);
/// assert_eq!(config.rrf_k, 60.0);
/// assert_eq!(config.keyword_weight, 1.0);
/// assert_eq!(config.vector_weight, 1.0);
/// assert_eq!(config.segment_separator, "\n");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate pool multiplier for each method in hybrid search (default: 4).
    #[serde(default = "default_oversample")]
    pub oversample: usize,
    /// RRF smoothing constant (default: 60).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Contribution weight of the keyword ranking (default: 1.0).
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,
    /// Contribution weight of the vector ranking (default: 1.0).
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    /// Text placed between consecutive chunks of a segment (default: `"\n"`).
    #[serde(default = "default_segment_separator")]
    pub segment_separator: String,
    /// How assembled segments are ordered (default: by position).
    #[serde(default)]
    pub segment_order: SegmentOrder,
}

fn default_oversample() -> usize {
    4
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_segment_separator() -> String {
    "\n".into()
}

impl SearchConfig {
    /// Check that the tunables are usable.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] for a zero oversampling factor,
    /// a non-positive RRF constant, negative weights, or all-zero weights.
    pub fn validate(&self) -> Result<(), LoupeError> {
        if self.oversample == 0 {
            return Err(LoupeError::InvalidArgument(
                "search.oversample must be at least 1".into(),
            ));
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(LoupeError::InvalidArgument(format!(
                "search.rrf_k must be a positive number, got {}",
                self.rrf_k
            )));
        }
        for (name, weight) in [
            ("keyword_weight", self.keyword_weight),
            ("vector_weight", self.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(LoupeError::InvalidArgument(format!(
                    "search.{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        if self.keyword_weight == 0.0 && self.vector_weight == 0.0 {
            return Err(LoupeError::InvalidArgument(
                "search weights cannot both be zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample: default_oversample(),
            rrf_k: default_rrf_k(),
            keyword_weight: default_weight(),
            vector_weight: default_weight(),
            segment_separator: default_segment_separator(),
            segment_order: SegmentOrder::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = LoupeConfig::default();
        assert_eq!(config.database.path, PathBuf::from(".loupe/index.db"));
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.base_url, "https://api.openai.com/v1");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.embedding.timeout_secs, 30);
        assert_eq!(config.search.oversample, 4);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.search.keyword_weight, 1.0);
        assert_eq!(config.search.vector_weight, 1.0);
        assert_eq!(config.search.segment_separator, "\n");
        assert_eq!(config.search.segment_order, SegmentOrder::Position);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = LoupeConfig::from_toml("").unwrap();
        assert_eq!(config.search.oversample, 4);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[database]
path = "/var/lib/loupe/index.db"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
base_url = "http://localhost:11434/v1"
dimensions = 768
batch_size = 16
timeout_secs = 5

[search]
oversample = 2
rrf_k = 30.0
keyword_weight = 0.5
vector_weight = 1.5
segment_separator = "\n\n"
segment_order = "relevance"
"#;
        let config = LoupeConfig::from_toml(toml).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/loupe/index.db"));
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.batch_size, 16);
        assert_eq!(config.embedding.timeout_secs, 5);
        assert_eq!(config.search.oversample, 2);
        assert_eq!(config.search.rrf_k, 30.0);
        assert_eq!(config.search.keyword_weight, 0.5);
        assert_eq!(config.search.vector_weight, 1.5);
        assert_eq!(config.search.segment_separator, "\n\n");
        assert_eq!(config.search.segment_order, SegmentOrder::Relevance);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = LoupeConfig::from_toml("{{invalid}}");
        assert!(matches!(result, Err(LoupeError::Toml(_))));
    }

    #[test]
    fn zero_oversample_is_rejected() {
        let result = LoupeConfig::from_toml("[search]\noversample = 0\n");
        assert!(matches!(result, Err(LoupeError::InvalidArgument(_))));
    }

    #[test]
    fn bad_weights_are_rejected() {
        let both_zero = SearchConfig {
            keyword_weight: 0.0,
            vector_weight: 0.0,
            ..SearchConfig::default()
        };
        assert!(both_zero.validate().is_err());

        let negative = SearchConfig {
            keyword_weight: -1.0,
            ..SearchConfig::default()
        };
        assert!(negative.validate().is_err());

        let keyword_off = SearchConfig {
            keyword_weight: 0.0,
            ..SearchConfig::default()
        };
        assert!(keyword_off.validate().is_ok());
    }

    #[test]
    fn non_positive_rrf_k_is_rejected() {
        let config = SearchConfig {
            rrf_k: 0.0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
        let config = SearchConfig {
            rrf_k: f64::NAN,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let result = LoupeConfig::from_file(Path::new("/definitely/not/here/.loupe.toml"));
        assert!(matches!(result, Err(LoupeError::FileNotFound(_))));
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = EmbeddingConfig {
            api_key: Some("sk-config".into()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-config"));
    }
}
