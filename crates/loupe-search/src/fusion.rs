//! Reciprocal Rank Fusion (RRF).
//!
//! Each ranked list contributes `weight / (rrf_k + rank)` to every identifier
//! it contains, with 1-based ranks. An identifier absent from a list gets no
//! term from it. Raw method scores are ignored, so lists with incomparable
//! score scales fuse cleanly.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use loupe_core::{FusedResult, RankedResult};

/// One method's ranking plus its fusion weight.
#[derive(Debug, Clone, Copy)]
pub struct RankedList<'a> {
    /// Results, best first.
    pub results: &'a [RankedResult],
    /// Multiplier applied to this list's reciprocal ranks.
    pub weight: f64,
}

impl<'a> RankedList<'a> {
    /// A list with weight `1.0`.
    pub fn new(results: &'a [RankedResult]) -> Self {
        Self {
            results,
            weight: 1.0,
        }
    }

    /// Set the fusion weight.
    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Fuse ranked lists into a single ranking, truncated to `limit`.
///
/// Ties are broken by best individual rank, then by identifier, so the output
/// is fully deterministic. An identifier repeated within one list counts only
/// at its first (best) position.
///
/// # Examples
///
/// ```
/// use loupe_core::RankedResult;
/// use loupe_search::fusion::{reciprocal_rank_fusion, RankedList};
///
/// let vector = vec![RankedResult::new("a", 0.9), RankedResult::new("b", 0.8)];
/// let keyword = vec![RankedResult::new("b", 12.0), RankedResult::new("c", 3.0)];
///
/// let fused = reciprocal_rank_fusion(
///     &[RankedList::new(&vector), RankedList::new(&keyword)],
///     60.0,
///     10,
/// );
/// assert_eq!(fused[0].id, "b");
/// assert_eq!(fused.len(), 3);
///
/// // Empty inputs produce empty output
/// assert!(reciprocal_rank_fusion(&[], 60.0, 10).is_empty());
/// ```
pub fn reciprocal_rank_fusion(
    lists: &[RankedList<'_>],
    rrf_k: f64,
    limit: usize,
) -> Vec<FusedResult> {
    let mut fused: HashMap<&str, FusedResult> = HashMap::new();

    for list in lists {
        let mut seen: HashSet<&str> = HashSet::with_capacity(list.results.len());
        for (position, hit) in list.results.iter().enumerate() {
            if !seen.insert(hit.id.as_str()) {
                continue;
            }
            let rank = position + 1;
            let contribution = list.weight / (rrf_k + rank as f64);
            let entry = fused.entry(hit.id.as_str()).or_insert_with(|| FusedResult {
                id: hit.id.clone(),
                score: 0.0,
                best_rank: rank,
            });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
        }
    }

    let mut results: Vec<FusedResult> = fused.into_values().collect();
    results.sort_by(compare_fused);
    results.truncate(limit);
    results
}

fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.best_rank.cmp(&b.best_rank))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(ids: &[&str]) -> Vec<RankedResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedResult::new(*id, 100.0 - i as f64))
            .collect()
    }

    #[test]
    fn rrf_combines_results_correctly() {
        let vector = ranked(&["auth", "parse"]);
        let keyword = ranked(&["parse", "log"]);

        let fused = reciprocal_rank_fusion(
            &[RankedList::new(&vector), RankedList::new(&keyword)],
            60.0,
            10,
        );

        assert_eq!(fused.len(), 3);
        // "parse" appears in both, should rank highest
        assert_eq!(fused[0].id, "parse");
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn result_in_both_ranks_higher() {
        let vector = ranked(&["unique_v", "shared"]);
        let keyword = ranked(&["unique_k", "shared"]);

        let fused = reciprocal_rank_fusion(
            &[RankedList::new(&vector), RankedList::new(&keyword)],
            60.0,
            10,
        );

        let score = |id: &str| fused.iter().find(|r| r.id == id).unwrap().score;
        assert!(score("shared") > score("unique_v"));
        assert!(score("shared") > score("unique_k"));
    }

    #[test]
    fn top_of_both_lists_is_top_fused() {
        let vector = ranked(&["x", "a", "b", "c"]);
        let keyword = ranked(&["x", "d", "e"]);
        let fused = reciprocal_rank_fusion(
            &[RankedList::new(&vector), RankedList::new(&keyword)],
            60.0,
            10,
        );
        assert_eq!(fused[0].id, "x");
        assert_eq!(fused[0].best_rank, 1);
    }

    #[test]
    fn ties_break_on_best_rank_then_id() {
        // b and d are both rank 2 in one list only: tie on score and rank.
        // a and c are both rank 1 in one list only.
        let vector = ranked(&["c", "d"]);
        let keyword = ranked(&["a", "b"]);
        let fused = reciprocal_rank_fusion(
            &[RankedList::new(&vector), RankedList::new(&keyword)],
            60.0,
            10,
        );
        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn single_list_preserves_order() {
        let vector = ranked(&["z", "y", "x"]);
        let fused = reciprocal_rank_fusion(&[RankedList::new(&vector)], 60.0, 10);
        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y", "x"]);
    }

    #[test]
    fn weights_scale_contributions() {
        let vector = ranked(&["v"]);
        let keyword = ranked(&["k"]);
        let fused = reciprocal_rank_fusion(
            &[
                RankedList::new(&vector).weighted(0.5),
                RankedList::new(&keyword).weighted(2.0),
            ],
            60.0,
            10,
        );
        assert_eq!(fused[0].id, "k");
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn zero_weight_list_still_contributes_candidates() {
        let vector = ranked(&["v"]);
        let keyword = ranked(&["k"]);
        let fused = reciprocal_rank_fusion(
            &[
                RankedList::new(&vector),
                RankedList::new(&keyword).weighted(0.0),
            ],
            60.0,
            10,
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "v");
        assert_eq!(fused[1].score, 0.0);
    }

    #[test]
    fn duplicates_within_a_list_count_once() {
        let vector = ranked(&["a", "a", "b"]);
        let fused = reciprocal_rank_fusion(&[RankedList::new(&vector)], 60.0, 10);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
        // "b" keeps its positional rank of 3
        assert!((fused[1].score - 1.0 / 63.0).abs() < 1e-12);
    }

    #[test]
    fn limit_truncates() {
        let vector = ranked(&["a", "b", "c", "d"]);
        let fused = reciprocal_rank_fusion(&[RankedList::new(&vector)], 60.0, 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn rrf_empty_inputs() {
        let empty: Vec<RankedResult> = Vec::new();
        let fused = reciprocal_rank_fusion(
            &[RankedList::new(&empty), RankedList::new(&empty)],
            60.0,
            10,
        );
        assert!(fused.is_empty());
    }
}
