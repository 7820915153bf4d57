//! Segment assembly: neighbor-window expansion and interval merging.
//!
//! Each matched chunk is widened to `[index + before, index + after]`, clipped
//! to its document. Windows in the same document that overlap or touch are
//! merged with a sort-and-sweep, and every merged window is rendered as one
//! contiguous block of text.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use loupe_core::traits::ChunkStore;
use loupe_core::{Chunk, ChunkId, LoupeError, Neighbors, SegmentOrder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunks;

/// A contiguous, document-scoped run of chunks.
///
/// `chunks` holds every index in `start..=end` exactly once, ascending.
///
/// # Examples
///
/// ```
/// use loupe_core::Chunk;
/// use loupe_search::segments::Segment;
///
/// let chunk = |index: usize, content: &str| Chunk {
///     id: format!("c{index}"),
///     document_id: "doc".into(),
///     index,
///     content: content.into(),
/// };
/// let segment = Segment {
///     document_id: "doc".into(),
///     start: 3,
///     end: 4,
///     chunks: vec![chunk(3, "first"), chunk(4, "second")],
/// };
/// assert_eq!(segment.render("\n"), "first\nsecond");
/// assert_eq!(segment.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Document the segment belongs to.
    pub document_id: String,
    /// First chunk index, inclusive.
    pub start: usize,
    /// Last chunk index, inclusive.
    pub end: usize,
    /// Member chunks in ascending index order.
    pub chunks: Vec<Chunk>,
}

impl Segment {
    /// Concatenate the member chunks' content with `separator`.
    pub fn render(&self, separator: &str) -> String {
        self.chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Number of chunks in the segment.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// `true` if the segment holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Merge inclusive `(start, end)` intervals that overlap or are adjacent.
///
/// The result is sorted by start and pairwise disjoint with a gap of at
/// least one index between consecutive intervals.
///
/// # Examples
///
/// ```
/// use loupe_search::segments::merge_intervals;
///
/// let merged = merge_intervals(vec![(6, 8), (0, 2), (3, 3), (10, 11)]);
/// assert_eq!(merged, vec![(0, 3), (6, 8), (10, 11)]);
/// ```
pub fn merge_intervals(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    intervals.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => {
                last.1 = last.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Expand, merge and fetch the segments around `ids`.
///
/// Duplicate ids are dropped before expansion. With
/// [`SegmentOrder::Position`] segments come out sorted by
/// `(document_id, start)`; with [`SegmentOrder::Relevance`] each segment
/// scores `Σ 1/(i+1)` over the matched chunks it holds, `i` being the chunk's
/// position in `ids`, and segments sort by descending score.
///
/// # Errors
///
/// Returns [`LoupeError::NotFound`] if an id has no chunk or a merged range
/// has holes in the store; store failures propagate unchanged.
pub fn assemble(
    store: &dyn ChunkStore,
    ids: &[ChunkId],
    neighbors: Neighbors,
    order: SegmentOrder,
) -> Result<Vec<Segment>, LoupeError> {
    neighbors.validate()?;

    let mut seen = HashSet::with_capacity(ids.len());
    let mut unique: Vec<ChunkId> = Vec::with_capacity(ids.len());
    for id in ids {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }
    if unique.is_empty() {
        return Ok(Vec::new());
    }

    let matched = chunks::retrieve(store, &unique)?;

    // Reciprocal rank of each matched (document, index).
    let mut rank_weight: HashMap<(&str, usize), f64> = HashMap::with_capacity(matched.len());
    let mut windows: BTreeMap<&str, Vec<(usize, usize)>> = BTreeMap::new();
    let mut lengths: HashMap<&str, usize> = HashMap::new();

    for (position, chunk) in matched.iter().enumerate() {
        let document_id = chunk.document_id.as_str();
        rank_weight.insert((document_id, chunk.index), 1.0 / (position as f64 + 1.0));

        let len = match lengths.get(document_id) {
            Some(len) => *len,
            None => {
                let len = store.document_len(document_id)?;
                lengths.insert(document_id, len);
                len
            }
        };
        if chunk.index >= len {
            return Err(LoupeError::NotFound(format!(
                "chunk {} claims index {} but document '{document_id}' has {len} chunks",
                chunk.id, chunk.index
            )));
        }

        windows
            .entry(document_id)
            .or_default()
            .push(expand(chunk.index, neighbors, len));
    }

    let mut scored: Vec<(f64, Segment)> = Vec::new();
    for (document_id, intervals) in windows {
        for (start, end) in merge_intervals(intervals) {
            let chunks = store.chunks_in_range(document_id, start, end)?;
            let contiguous = chunks.len() == end - start + 1
                && chunks.iter().zip(start..=end).all(|(c, i)| c.index == i);
            if !contiguous {
                return Err(LoupeError::NotFound(format!(
                    "document '{document_id}' is missing chunks in range {start}..={end}"
                )));
            }

            let score = chunks
                .iter()
                .filter_map(|c| rank_weight.get(&(document_id, c.index)))
                .sum();
            scored.push((
                score,
                Segment {
                    document_id: document_id.to_string(),
                    start,
                    end,
                    chunks,
                },
            ));
        }
    }

    // BTreeMap iteration already yields (document_id, start) order.
    if order == SegmentOrder::Relevance {
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| by_position(a, b)));
    }

    debug!(
        matched = matched.len(),
        segments = scored.len(),
        ?order,
        "assembled segments"
    );
    Ok(scored.into_iter().map(|(_, segment)| segment).collect())
}

fn expand(index: usize, neighbors: Neighbors, len: usize) -> (usize, usize) {
    let last = len.saturating_sub(1) as i64;
    let index = index as i64;
    let start = index.saturating_add(neighbors.before).clamp(0, last);
    let end = index.saturating_add(neighbors.after).clamp(0, last);
    (start as usize, end as usize)
}

fn by_position(a: &Segment, b: &Segment) -> Ordering {
    a.document_id
        .cmp(&b.document_id)
        .then_with(|| a.start.cmp(&b.start))
}
