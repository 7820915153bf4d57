//! Hybrid retrieval for chunked documents.
//!
//! Combines SQLite FTS5 keyword search with embedding similarity search,
//! fuses both with Reciprocal Rank Fusion, and assembles matched chunks into
//! contiguous segments with their neighbors.
//!
//! - [`search::Retriever`]: keyword, vector and hybrid search, chunk and
//!   segment retrieval
//! - [`fusion`]: pure RRF over ranked lists
//! - [`segments`]: neighbor-window expansion and interval merging
//! - [`store::SqliteIndex`]: SQLite chunk store, FTS5 keyword index, BLOB
//!   vector index
//! - [`embedding::EmbeddingClient`]: OpenAI-compatible embedding client

pub mod chunks;
pub mod embedding;
pub mod fusion;
pub mod search;
pub mod segments;
pub mod store;
