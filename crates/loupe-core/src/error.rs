use std::path::PathBuf;

/// Errors that can occur across the loupe retrieval pipeline.
///
/// Library crates use this type directly; the binary converts to
/// `miette::Report` at the boundary. Empty search results are never an
/// error.
///
/// # Examples
///
/// ```
/// use loupe_core::LoupeError;
///
/// let err = LoupeError::InvalidArgument("num_results must be positive".into());
/// assert!(err.to_string().contains("num_results"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum LoupeError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(loupe::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(loupe::config), help("check your .loupe.toml"))]
    Config(String),

    /// The chunk store or one of the indexes failed.
    #[error("database error: {0}")]
    #[diagnostic(code(loupe::database))]
    Database(String),

    /// The embedding service failed or returned malformed output.
    #[error("embedding error: {0}")]
    #[diagnostic(
        code(loupe::embedding),
        help("check [embedding] in .loupe.toml and that the provider is reachable")
    )]
    Embedding(String),

    /// An identifier has no backing chunk (store and index are inconsistent).
    #[error("not found: {0}")]
    #[diagnostic(code(loupe::not_found), help("re-ingest the affected documents"))]
    NotFound(String),

    /// A caller-supplied argument was rejected before any collaborator call.
    #[error("invalid argument: {0}")]
    #[diagnostic(code(loupe::invalid_argument))]
    InvalidArgument(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(loupe::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(loupe::toml))]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    #[diagnostic(code(loupe::file_not_found))]
    FileNotFound(PathBuf),
}

impl LoupeError {
    /// Prefix the message with the pipeline stage that failed.
    ///
    /// The variant is preserved so callers can still match on the kind of
    /// failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use loupe_core::LoupeError;
    ///
    /// let err = LoupeError::Embedding("connection refused".into()).with_stage("vector search");
    /// assert!(matches!(err, LoupeError::Embedding(_)));
    /// assert_eq!(err.to_string(), "embedding error: vector search: connection refused");
    /// ```
    #[must_use]
    pub fn with_stage(self, stage: &str) -> Self {
        match self {
            Self::Config(msg) => Self::Config(format!("{stage}: {msg}")),
            Self::Database(msg) => Self::Database(format!("{stage}: {msg}")),
            Self::Embedding(msg) => Self::Embedding(format!("{stage}: {msg}")),
            Self::NotFound(msg) => Self::NotFound(format!("{stage}: {msg}")),
            Self::InvalidArgument(msg) => Self::InvalidArgument(format!("{stage}: {msg}")),
            other => other,
        }
    }
}
