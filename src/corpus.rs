//! Deterministic synthetic vector data.
//!
//! Components are drawn uniformly from `[0, 1)` with a seeded `StdRng`, so a
//! given `(count, dimension, seed)` always yields bit-identical vectors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{HarnessError, HarnessResult};
use crate::types::{Corpus, QuerySet, Vector};

/// Offset applied to the run seed when generating queries, so queries are
/// never drawn from the same stream as the corpus.
pub const QUERY_SEED_OFFSET: u64 = 10_000;

/// Generate `count` vectors of `dimension` components in `[0, 1)`.
///
/// # Errors
///
/// `InvalidParameter` if `count` or `dimension` is zero.
pub fn generate(count: usize, dimension: usize, seed: u64) -> HarnessResult<Vec<Vector>> {
    if count == 0 {
        return Err(HarnessError::invalid("vector count must be > 0"));
    }
    if dimension == 0 {
        return Err(HarnessError::invalid("vector dimension must be > 0"));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..count)
        .map(|_| {
            let data: Vec<f32> = (0..dimension).map(|_| rng.r#gen::<f32>()).collect();
            Vector::new(data)
        })
        .collect())
}

/// Generate a corpus with ids `0..count`.
pub fn generate_corpus(count: usize, dimension: usize, seed: u64) -> HarnessResult<Corpus> {
    Corpus::from_vectors(generate(count, dimension, seed)?)
}

/// Generate a query set from the run seed (offset by [`QUERY_SEED_OFFSET`]).
pub fn generate_queries(count: usize, dimension: usize, seed: u64) -> HarnessResult<QuerySet> {
    QuerySet::new(generate(
        count,
        dimension,
        seed.wrapping_add(QUERY_SEED_OFFSET),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_is_bit_identical() {
        let a = generate(50, 16, 42).unwrap();
        let b = generate(50, 16, 42).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            let xb: Vec<u32> = x.as_slice().iter().map(|f| f.to_bits()).collect();
            let yb: Vec<u32> = y.as_slice().iter().map(|f| f.to_bits()).collect();
            assert_eq!(xb, yb);
        }
    }

    #[test]
    fn test_different_seed_differs() {
        let a = generate(4, 8, 1).unwrap();
        let b = generate(4, 8, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_values_in_unit_interval() {
        let vectors = generate(20, 32, 7).unwrap();
        assert_eq!(vectors.len(), 20);
        for v in &vectors {
            assert_eq!(v.dimensions(), 32);
            assert!(v.as_slice().iter().all(|&x| (0.0..1.0).contains(&x)));
        }
    }

    #[test]
    fn test_zero_count_or_dimension_rejected() {
        assert!(matches!(
            generate(0, 8, 42),
            Err(HarnessError::InvalidParameter { .. })
        ));
        assert!(matches!(
            generate(8, 0, 42),
            Err(HarnessError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_queries_use_separate_stream() {
        let corpus = generate_corpus(3, 4, 42).unwrap();
        let queries = generate_queries(3, 4, 42).unwrap();
        assert_ne!(corpus.get(0), queries.get(0));
        assert_eq!(corpus.ids(), vec![0, 1, 2]);
    }
}
