//! Core data types shared by every stage of a benchmark run.
//!
//! A [`Corpus`] and a [`QuerySet`] are built once at the start of a run and
//! are read-only afterwards. Both are cheap to clone (the vector data sits
//! behind `Arc`s) so they can be handed to concurrently running backends.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{HarnessError, HarnessResult};

/// Identifier of a corpus vector. Stable for the lifetime of a run.
pub type VectorId = u64;

/// A fixed-length vector of `f32` components.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Arc<[f32]>,
}

impl Serialize for Vector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.data.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = Vec::<f32>::deserialize(deserializer)?;
        if data.is_empty() {
            return Err(serde::de::Error::custom("vector data cannot be empty"));
        }
        Ok(Vector::new(data))
    }
}

impl Vector {
    /// Create a vector from its components.
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty.
    pub fn new(data: Vec<f32>) -> Self {
        assert!(!data.is_empty(), "Vector data cannot be empty");
        Self {
            data: Arc::from(data.into_boxed_slice()),
        }
    }

    /// Get the vector data as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get the number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    /// Squared Euclidean distance, accumulated in `f64`.
    ///
    /// Ordering by squared distance is the same as ordering by distance, so
    /// callers that only rank candidates never need the square root.
    ///
    /// # Returns
    ///
    /// `None` if the dimensions don't match.
    pub fn squared_l2(&self, other: &Vector) -> Option<f64> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        Some(squared_l2(&self.data, &other.data))
    }

    /// Euclidean distance, or `None` if the dimensions don't match.
    pub fn euclidean_distance(&self, other: &Vector) -> Option<f64> {
        self.squared_l2(other).map(f64::sqrt)
    }
}

/// Squared L2 distance between two equal-length slices.
#[inline]
pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

/// The indexed vectors, keyed by unique id.
///
/// Entries are kept sorted by ascending id so that iteration order (and
/// therefore insertion order into every backend) is deterministic.
#[derive(Debug, Clone)]
pub struct Corpus {
    entries: Arc<[(VectorId, Vector)]>,
    dimension: usize,
}

impl Corpus {
    /// Build a corpus from `(id, vector)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the corpus is empty, ids repeat, or
    /// vectors disagree on dimension.
    pub fn from_entries(mut entries: Vec<(VectorId, Vector)>) -> HarnessResult<Self> {
        let dimension = match entries.first() {
            Some((_, v)) => v.dimensions(),
            None => return Err(HarnessError::invalid("corpus must not be empty")),
        };

        let mut seen = HashSet::with_capacity(entries.len());
        for (id, vector) in &entries {
            if !seen.insert(*id) {
                return Err(HarnessError::invalid(format!("duplicate corpus id {id}")));
            }
            if vector.dimensions() != dimension {
                return Err(HarnessError::invalid(format!(
                    "corpus vector {id} has {} dimensions, expected {dimension}",
                    vector.dimensions()
                )));
            }
        }

        entries.sort_by_key(|(id, _)| *id);
        Ok(Self {
            entries: Arc::from(entries.into_boxed_slice()),
            dimension,
        })
    }

    /// Build a corpus whose ids are the positions `0..vectors.len()`.
    pub fn from_vectors(vectors: Vec<Vector>) -> HarnessResult<Self> {
        Self::from_entries(
            vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i as VectorId, v))
                .collect(),
        )
    }

    /// Number of vectors (N).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed corpus; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension (D).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Look up a vector by id.
    pub fn get(&self, id: VectorId) -> Option<&Vector> {
        self.entries
            .binary_search_by_key(&id, |(eid, _)| *eid)
            .ok()
            .map(|pos| &self.entries[pos].1)
    }

    /// Iterate `(id, vector)` pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (VectorId, &Vector)> {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    /// All ids in ascending order.
    pub fn ids(&self) -> Vec<VectorId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }
}

/// The ordered query vectors.
#[derive(Debug, Clone)]
pub struct QuerySet {
    queries: Arc<[Vector]>,
    dimension: usize,
}

impl QuerySet {
    /// Build a query set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if there are no queries or they disagree
    /// on dimension.
    pub fn new(queries: Vec<Vector>) -> HarnessResult<Self> {
        let dimension = match queries.first() {
            Some(v) => v.dimensions(),
            None => return Err(HarnessError::invalid("query set must not be empty")),
        };
        if let Some(pos) = queries.iter().position(|q| q.dimensions() != dimension) {
            return Err(HarnessError::invalid(format!(
                "query {pos} has {} dimensions, expected {dimension}",
                queries[pos].dimensions()
            )));
        }
        Ok(Self {
            queries: Arc::from(queries.into_boxed_slice()),
            dimension,
        })
    }

    /// Number of queries (Q).
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Always false for a constructed query set; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Vector dimension (D).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Query at position `index`.
    pub fn get(&self, index: usize) -> Option<&Vector> {
        self.queries.get(index)
    }

    /// Iterate the queries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Vector> {
        self.queries.iter()
    }
}
