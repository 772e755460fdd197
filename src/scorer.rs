//! Precision@K scoring.
//!
//! Retrieved ids are compared to the ground truth with set semantics: order
//! does not matter and a duplicated id counts once. This is recall-at-k
//! rather than ranked precision. A backend that returns more than `k` ids
//! only has its first `k` considered.

use std::collections::HashSet;

use crate::error::{HarnessError, HarnessResult};
use crate::ground_truth::GroundTruthSet;
use crate::types::VectorId;

/// Number of distinct ids among the first `k` retrieved that are in `truth`.
pub fn correct_count(retrieved: &[VectorId], truth: &[VectorId], k: usize) -> usize {
    let truth: HashSet<VectorId> = truth.iter().copied().collect();
    let retrieved: HashSet<VectorId> = retrieved.iter().take(k).copied().collect();
    retrieved.intersection(&truth).count()
}

/// precision@k for a single query: `|retrieved ∩ truth| / k`.
pub fn precision_at_k(retrieved: &[VectorId], truth: &[VectorId], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    correct_count(retrieved, truth, k) as f64 / k as f64
}

/// Running precision over a backend's query phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecisionScorer {
    k: usize,
    correct: usize,
    queries: usize,
}

impl PrecisionScorer {
    /// Start scoring at cut-off `k`.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            correct: 0,
            queries: 0,
        }
    }

    /// Record one query's retrieved ids against its ground truth.
    ///
    /// Returns the number of correct results for this query.
    pub fn record(&mut self, retrieved: &[VectorId], truth: &[VectorId]) -> usize {
        let hits = correct_count(retrieved, truth, self.k);
        self.correct += hits;
        self.queries += 1;
        hits
    }

    /// Total correct results so far.
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Queries recorded so far.
    pub fn queries(&self) -> usize {
        self.queries
    }

    /// `correct / (queries * k)`, or 0 before anything is recorded.
    pub fn precision(&self) -> f64 {
        let total = self.queries * self.k;
        if total == 0 {
            return 0.0;
        }
        (self.correct as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Overall precision of a full set of retrievals.
///
/// # Errors
///
/// `InvalidParameter` if the number of retrievals differs from the number
/// of ground-truth entries.
pub fn score(retrievals: &[Vec<VectorId>], ground_truth: &GroundTruthSet) -> HarnessResult<f64> {
    if retrievals.len() != ground_truth.len() {
        return Err(HarnessError::invalid(format!(
            "{} retrievals for {} ground-truth queries",
            retrievals.len(),
            ground_truth.len()
        )));
    }
    let mut scorer = PrecisionScorer::new(ground_truth.k());
    for (retrieved, truth) in retrievals.iter().zip(ground_truth.iter()) {
        scorer.record(retrieved, truth);
    }
    Ok(scorer.precision())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_order_is_irrelevant() {
        assert_eq!(precision_at_k(&[3, 2, 1], &[1, 2, 3], 3), 1.0);
    }

    #[test]
    fn test_partial_overlap() {
        assert_eq!(correct_count(&[1, 9, 3, 8], &[1, 2, 3, 4], 4), 2);
        assert_eq!(precision_at_k(&[1, 9, 3, 8], &[1, 2, 3, 4], 4), 0.5);
    }

    #[test]
    fn test_duplicates_count_once() {
        assert_eq!(correct_count(&[1, 1, 1], &[1, 2, 3], 3), 1);
    }

    #[test]
    fn test_short_result_lists_penalised() {
        // Only one id returned for k = 4
        assert_eq!(precision_at_k(&[1], &[1, 2, 3, 4], 4), 0.25);
    }

    #[test]
    fn test_extra_ids_beyond_k_ignored() {
        assert_eq!(correct_count(&[9, 8, 1, 2], &[1, 2], 2), 0);
    }

    #[test]
    fn test_scorer_matches_mean_when_full() {
        let gt = GroundTruthSet::from_neighbors(2, vec![vec![1, 2], vec![3, 4]]).unwrap();
        let retrieved = vec![vec![1, 2], vec![3, 9]];
        assert_eq!(score(&retrieved, &gt).unwrap(), 0.75);
    }

    #[test]
    fn test_score_length_mismatch() {
        let gt = GroundTruthSet::from_neighbors(1, vec![vec![1], vec![2]]).unwrap();
        assert!(score(&[vec![1]], &gt).is_err());
    }

    #[test]
    fn test_empty_scorer() {
        assert_eq!(PrecisionScorer::new(10).precision(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_precision_bounded(
            truth in proptest::collection::hash_set(0u64..200, 1..20),
            retrieved in proptest::collection::vec(0u64..200, 0..40),
        ) {
            let truth: Vec<u64> = truth.into_iter().collect();
            let k = truth.len();
            let p = precision_at_k(&retrieved, &truth, k);
            prop_assert!((0.0..=1.0).contains(&p));

            let mut scorer = PrecisionScorer::new(k);
            scorer.record(&retrieved, &truth);
            scorer.record(&truth, &truth);
            prop_assert!((0.0..=1.0).contains(&scorer.precision()));
        }
    }
}
