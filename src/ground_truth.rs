//! Exact k-nearest-neighbor reference sets.
//!
//! This is the correctness oracle every backend is scored against, so it is
//! a brute-force scan: O(Q·N·D). Selection uses `select_nth_unstable_by`
//! followed by a sort of the k survivors, which yields the same output as a
//! full sort.
//!
//! Ordering is ascending Euclidean distance with ties broken by ascending
//! id. Distances are compared squared (in `f64`), which preserves order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::types::{Corpus, QuerySet, VectorId, squared_l2};

/// For each query index, the true k nearest corpus ids in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthSet {
    k: usize,
    neighbors: Vec<Vec<VectorId>>,
}

impl GroundTruthSet {
    /// Wrap precomputed neighbor lists.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if any list does not hold exactly `k` ids.
    pub fn from_neighbors(k: usize, neighbors: Vec<Vec<VectorId>>) -> HarnessResult<Self> {
        if let Some(pos) = neighbors.iter().position(|n| n.len() != k) {
            return Err(HarnessError::invalid(format!(
                "ground truth for query {pos} has {} ids, expected {k}",
                neighbors[pos].len()
            )));
        }
        Ok(Self { k, neighbors })
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of queries covered.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether no queries are covered.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// True neighbors of query `index`.
    pub fn get(&self, index: usize) -> Option<&[VectorId]> {
        self.neighbors.get(index).map(Vec::as_slice)
    }

    /// Iterate neighbor lists in query order.
    pub fn iter(&self) -> impl Iterator<Item = &[VectorId]> {
        self.neighbors.iter().map(Vec::as_slice)
    }
}

/// Rank `(id, squared_distance)` pairs: nearer first, smaller id on ties.
#[inline]
pub(crate) fn rank_order(a: &(VectorId, f64), b: &(VectorId, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Keep the `k` best-ranked candidates, sorted.
pub(crate) fn select_nearest(
    mut scored: Vec<(VectorId, f64)>,
    k: usize,
) -> Vec<(VectorId, f64)> {
    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_by(rank_order);
    scored
}

/// Exact k nearest ids of `query` among `candidates`.
pub(crate) fn exact_knn<'a>(
    candidates: impl Iterator<Item = (VectorId, &'a [f32])>,
    query: &[f32],
    k: usize,
) -> Vec<VectorId> {
    let scored = candidates
        .map(|(id, data)| (id, squared_l2(query, data)))
        .collect();
    select_nearest(scored, k).into_iter().map(|(id, _)| id).collect()
}

/// Compute the exact k nearest corpus ids for every query.
///
/// # Errors
///
/// `InvalidParameter` if `k == 0`, `k > N`, or the query dimension differs
/// from the corpus dimension.
pub fn compute_ground_truth(
    corpus: &Corpus,
    queries: &QuerySet,
    k: usize,
) -> HarnessResult<GroundTruthSet> {
    if k == 0 {
        return Err(HarnessError::invalid("k must be > 0"));
    }
    if k > corpus.len() {
        return Err(HarnessError::invalid(format!(
            "k ({k}) exceeds corpus size ({})",
            corpus.len()
        )));
    }
    if queries.dimension() != corpus.dimension() {
        return Err(HarnessError::invalid(format!(
            "query dimension {} differs from corpus dimension {}",
            queries.dimension(),
            corpus.dimension()
        )));
    }

    let neighbors = queries
        .iter()
        .map(|q| {
            exact_knn(
                corpus.iter().map(|(id, v)| (id, v.as_slice())),
                q.as_slice(),
                k,
            )
        })
        .collect::<Vec<_>>();

    debug!(
        queries = queries.len(),
        corpus = corpus.len(),
        k,
        "Computed ground truth"
    );
    Ok(GroundTruthSet { k, neighbors })
}
