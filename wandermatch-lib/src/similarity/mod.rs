//! Per-field similarity between the query and every candidate
//!
//! Cell `(i, j)` is the dot product of the query's field `j` vector with
//! candidate `i`'s field `j` vector. Providers return unit-length vectors,
//! so this is cosine similarity and lies in [-1, 1]. Nothing here
//! re-normalizes: vectors that are not unit length give meaningless scores.

use serde::Serialize;

use crate::embed::{Embedding, PoolEmbeddingSet};
use crate::{Error, Result};

/// Candidates x fields matrix of cosine similarities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatrix {
    candidates: usize,
    fields: usize,
    values: Vec<f32>,
}

impl SimilarityMatrix {
    /// Build a matrix directly from rows (each of the same length).
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let fields = rows.first().map_or(0, Vec::len);
        let candidates = rows.len();

        let mut values = Vec::with_capacity(candidates * fields);
        for row in rows {
            if row.len() != fields {
                return Err(Error::DimensionMismatch {
                    context: "similarity row",
                    expected: fields,
                    actual: row.len(),
                });
            }
            values.extend(row);
        }

        Ok(Self {
            candidates,
            fields,
            values,
        })
    }

    /// Compare the query's field vectors against every candidate.
    pub fn compute(query: &[Embedding], pool: &PoolEmbeddingSet) -> Result<Self> {
        if query.len() != pool.fields() {
            return Err(Error::DimensionMismatch {
                context: "query fields",
                expected: pool.fields(),
                actual: query.len(),
            });
        }
        if let Some(bad) = query.iter().find(|q| q.len() != pool.dim()) {
            return Err(Error::DimensionMismatch {
                context: "query embedding dimension",
                expected: pool.dim(),
                actual: bad.len(),
            });
        }

        let fields = pool.fields();
        let mut values = Vec::with_capacity(pool.candidates() * fields);
        for i in 0..pool.candidates() {
            for (j, q) in query.iter().enumerate() {
                values.push(dot(q, pool.get(i, j)));
            }
        }

        Ok(Self {
            candidates: pool.candidates(),
            fields,
            values,
        })
    }

    #[must_use]
    pub fn candidates(&self) -> usize {
        self.candidates
    }

    #[must_use]
    pub fn fields(&self) -> usize {
        self.fields
    }

    /// Similarity of candidate `i`'s field `j`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Option<f32> {
        if i < self.candidates && j < self.fields {
            Some(self.values[i * self.fields + j])
        } else {
            None
        }
    }

    /// One candidate's per-field similarities.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        (i < self.candidates).then(|| &self.values[i * self.fields..(i + 1) * self.fields])
    }

    /// Rows in candidate order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact(0) panics, and a zero-field matrix has no data anyway
        self.values
            .chunks_exact(self.fields.max(1))
            .take(self.candidates)
    }
}

/// Compute dot product between two vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbeddingProvider, HashProvider};

    #[test]
    fn test_dot_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((dot(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_orthogonal() {
        assert!(dot(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_dot_opposite() {
        assert!((dot(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compute_cells() {
        let pool = PoolEmbeddingSet::new(
            2,
            2,
            2,
            vec![
                1.0, 0.0, 0.0, 1.0, // candidate 0
                0.0, 1.0, 0.6, 0.8, // candidate 1
            ],
        )
        .unwrap();
        let query = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        let m = SimilarityMatrix::compute(&query, &pool).unwrap();

        assert_eq!(m.candidates(), 2);
        assert_eq!(m.fields(), 2);
        assert_eq!(m.row(0).unwrap(), &[1.0, 1.0]);
        assert!((m.get(1, 0).unwrap() - 0.0).abs() < 1e-6);
        assert!((m.get(1, 1).unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn test_unit_vectors_stay_in_range() {
        let provider = HashProvider::new(16);
        let answers = [
            "hiking", "diving", "N/A", "beach", "museums and galleries", "street food",
        ];
        let vectors = provider.embed(&answers).unwrap();

        // every answer against every other, as a 6-candidate, 1-field pool
        let pool = PoolEmbeddingSet::from_vectors(6, 1, 16, vectors.clone()).unwrap();
        for q in &vectors {
            let m = SimilarityMatrix::compute(std::slice::from_ref(q), &pool).unwrap();
            for row in m.rows() {
                for &s in row {
                    assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&s), "similarity {s} out of range");
                }
            }
        }
    }

    #[test]
    fn test_query_field_count_mismatch() {
        let pool = PoolEmbeddingSet::new(1, 2, 1, vec![1.0, 1.0]).unwrap();
        let err = SimilarityMatrix::compute(&[vec![1.0]], &pool).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let pool = PoolEmbeddingSet::new(1, 1, 2, vec![1.0, 0.0]).unwrap();
        let err = SimilarityMatrix::compute(&[vec![1.0, 0.0, 0.0]], &pool).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_pool() {
        let pool = PoolEmbeddingSet::new(0, 2, 3, vec![]).unwrap();
        let m = SimilarityMatrix::compute(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]], &pool)
            .unwrap();
        assert_eq!(m.candidates(), 0);
        assert_eq!(m.rows().count(), 0);
    }

    #[test]
    fn test_from_rows_ragged() {
        let err = SimilarityMatrix::from_rows(vec![vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
