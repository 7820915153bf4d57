//! Core types, configuration, and error handling for loupe.
//!
//! This crate provides the shared foundation used by the retrieval crate and
//! the CLI:
//! - [`LoupeError`]: unified error type using `thiserror` and `miette`
//! - [`LoupeConfig`]: configuration loaded from `.loupe.toml`
//! - Data model: [`Chunk`], [`RankedResult`], [`FusedResult`],
//!   [`SearchResults`], [`Neighbors`]
//! - Collaborator capabilities in [`traits`]

mod config;
mod error;
pub mod traits;
mod types;

pub use config::{DatabaseConfig, EmbeddingConfig, LoupeConfig, SearchConfig};
pub use error::LoupeError;
pub use types::{
    Chunk, ChunkId, FusedResult, Neighbors, OutputFormat, RankedResult, SearchMethod,
    SearchResults, SegmentOrder,
};

/// A convenience `Result` type for loupe operations.
pub type Result<T> = std::result::Result<T, LoupeError>;
