use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LoupeError;

/// Stable, globally unique chunk identifier.
pub type ChunkId = String;

/// A unit of retrievable text.
///
/// For a fixed `document_id`, `index` values are contiguous and start at 0.
/// Chunks are immutable once ingested.
///
/// # Examples
///
/// ```
/// use loupe_core::Chunk;
///
/// let chunk = Chunk {
///     id: "c0".into(),
///     document_id: "relativity".into(),
///     index: 0,
///     content: "Definition of Simultaneity".into(),
/// };
/// assert_eq!(chunk.to_string(), "Definition of Simultaneity");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Globally unique identifier.
    pub id: ChunkId,
    /// Identifier of the owning document.
    pub document_id: String,
    /// Zero-based position within the document.
    pub index: usize,
    /// The chunk's text.
    pub content: String,
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

/// An `(identifier, score)` pair produced by a single search method.
///
/// Scores are only comparable within one method's list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Method-specific relevance, higher is better.
    pub score: f64,
}

impl RankedResult {
    /// Create a ranked result.
    pub fn new(id: impl Into<ChunkId>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Output of reciprocal rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedResult {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Fused RRF score.
    pub score: f64,
    /// Best (lowest) 1-based rank across the contributing methods.
    pub best_rank: usize,
}

/// Two parallel sequences of equal length: `chunk_ids[i]` scored `scores[i]`.
///
/// # Examples
///
/// ```
/// use loupe_core::{RankedResult, SearchResults};
///
/// let results: SearchResults = vec![RankedResult::new("a", 0.9), RankedResult::new("b", 0.4)]
///     .into_iter()
///     .collect();
/// assert_eq!(results.chunk_ids, vec!["a", "b"]);
/// assert_eq!(results.scores, vec![0.9, 0.4]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    /// Ranked chunk identifiers, best first.
    pub chunk_ids: Vec<ChunkId>,
    /// Scores matching `chunk_ids` positionally.
    pub scores: Vec<f64>,
}

impl SearchResults {
    /// Number of results.
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    /// `true` when no chunk matched.
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Iterate `(id, score)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.chunk_ids
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
    }
}

impl FromIterator<RankedResult> for SearchResults {
    fn from_iter<I: IntoIterator<Item = RankedResult>>(iter: I) -> Self {
        let (chunk_ids, scores) = iter.into_iter().map(|r| (r.id, r.score)).unzip();
        Self { chunk_ids, scores }
    }
}

impl FromIterator<FusedResult> for SearchResults {
    fn from_iter<I: IntoIterator<Item = FusedResult>>(iter: I) -> Self {
        let (chunk_ids, scores) = iter.into_iter().map(|r| (r.id, r.score)).unzip();
        Self { chunk_ids, scores }
    }
}

/// Neighbor window used to expand matched chunks into segments.
///
/// `before` must be `<= 0` and `after` must be `>= 0`.
///
/// # Examples
///
/// ```
/// use loupe_core::Neighbors;
///
/// let n = Neighbors::new(-1, 2).unwrap();
/// assert_eq!((n.before, n.after), (-1, 2));
/// assert!(Neighbors::new(1, 0).is_err());
/// assert_eq!(Neighbors::default(), Neighbors::new(-1, 1).unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbors {
    /// Offset of the first neighbor to include (non-positive).
    pub before: i64,
    /// Offset of the last neighbor to include (non-negative).
    pub after: i64,
}

impl Neighbors {
    /// Build a validated neighbor window.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] if `before > 0` or `after < 0`.
    pub fn new(before: i64, after: i64) -> Result<Self, LoupeError> {
        let neighbors = Self { before, after };
        neighbors.validate()?;
        Ok(neighbors)
    }

    /// No expansion: each chunk stands alone.
    pub const NONE: Neighbors = Neighbors {
        before: 0,
        after: 0,
    };

    /// Check the window bounds.
    ///
    /// # Errors
    ///
    /// Returns [`LoupeError::InvalidArgument`] if `before > 0` or `after < 0`.
    pub fn validate(&self) -> Result<(), LoupeError> {
        if self.before > 0 {
            return Err(LoupeError::InvalidArgument(format!(
                "neighbors.before must be <= 0, got {}",
                self.before
            )));
        }
        if self.after < 0 {
            return Err(LoupeError::InvalidArgument(format!(
                "neighbors.after must be >= 0, got {}",
                self.after
            )));
        }
        Ok(())
    }
}

impl Default for Neighbors {
    fn default() -> Self {
        Self {
            before: -1,
            after: 1,
        }
    }
}

/// Which retrieval signal to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Lexical (inverted index) ranking.
    Keyword,
    /// Embedding nearest-neighbor ranking.
    Vector,
    /// Reciprocal rank fusion of keyword and vector rankings.
    #[default]
    Hybrid,
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMethod::Keyword => write!(f, "keyword"),
            SearchMethod::Vector => write!(f, "vector"),
            SearchMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" | "lexical" => Ok(SearchMethod::Keyword),
            "vector" | "semantic" => Ok(SearchMethod::Vector),
            "hybrid" => Ok(SearchMethod::Hybrid),
            other => Err(format!("unknown search method: {other}")),
        }
    }
}

/// Ordering of assembled segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentOrder {
    /// By `(document_id, start index)`.
    #[default]
    Position,
    /// By aggregate reciprocal rank of the matched chunks each segment holds.
    Relevance,
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use loupe_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_results_stay_parallel() {
        let results: SearchResults = vec![
            RankedResult::new("x", 3.0),
            RankedResult::new("y", 2.0),
            RankedResult::new("z", 1.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results.chunk_ids.len(), results.scores.len());
        let pairs: Vec<(&str, f64)> = results.iter().collect();
        assert_eq!(pairs[1], ("y", 2.0));
    }

    #[test]
    fn empty_search_results() {
        let results: SearchResults = Vec::<RankedResult>::new().into_iter().collect();
        assert!(results.is_empty());
        assert_eq!(results.len(), 0);
    }

    #[test]
    fn search_results_serialize_camel_case() {
        let results: SearchResults = vec![RankedResult::new("a", 1.0)].into_iter().collect();
        let json = serde_json::to_value(&results).unwrap();
        assert!(json.get("chunkIds").is_some());
        assert!(json.get("scores").is_some());
    }

    #[test]
    fn neighbors_validation() {
        assert!(Neighbors::new(0, 0).is_ok());
        assert!(Neighbors::new(-3, 0).is_ok());
        assert!(matches!(
            Neighbors::new(0, -1),
            Err(LoupeError::InvalidArgument(_))
        ));
        assert!(matches!(
            Neighbors::new(2, 2),
            Err(LoupeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn search_method_from_str() {
        assert_eq!("keyword".parse::<SearchMethod>().unwrap(), SearchMethod::Keyword);
        assert_eq!("VECTOR".parse::<SearchMethod>().unwrap(), SearchMethod::Vector);
        assert_eq!("hybrid".parse::<SearchMethod>().unwrap(), SearchMethod::Hybrid);
        assert!("fuzzy".parse::<SearchMethod>().is_err());
        assert_eq!(SearchMethod::default(), SearchMethod::Hybrid);
    }

    #[test]
    fn output_format_round_trips_display() {
        for fmt in [OutputFormat::Text, OutputFormat::Json] {
            assert_eq!(fmt.to_string().parse::<OutputFormat>().unwrap(), fmt);
        }
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn chunk_serializes_camel_case() {
        let chunk = Chunk {
            id: "c1".into(),
            document_id: "doc".into(),
            index: 4,
            content: "text".into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["documentId"], "doc");
        assert_eq!(json["index"], 4);
    }
}
