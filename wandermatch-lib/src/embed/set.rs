use crate::embed::Embedding;
use crate::{Error, Result};

/// One embedding per field for every candidate in a pool.
///
/// Stored densely, row-major: candidate, then field, then vector component.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEmbeddingSet {
    candidates: usize,
    fields: usize,
    dim: usize,
    data: Vec<f32>,
}

impl PoolEmbeddingSet {
    /// Wrap a flat buffer of `candidates * fields * dim` floats.
    pub fn new(candidates: usize, fields: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        let expected = candidates * fields * dim;
        if data.len() != expected {
            return Err(Error::DimensionMismatch {
                context: "pool embedding buffer",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            candidates,
            fields,
            dim,
            data,
        })
    }

    /// Assemble from per-cell vectors in row-major order (candidate 0's fields first).
    pub fn from_vectors(
        candidates: usize,
        fields: usize,
        dim: usize,
        vectors: Vec<Embedding>,
    ) -> Result<Self> {
        if vectors.len() != candidates * fields {
            return Err(Error::DimensionMismatch {
                context: "pool embedding count",
                expected: candidates * fields,
                actual: vectors.len(),
            });
        }

        let mut data = Vec::with_capacity(candidates * fields * dim);
        for v in vectors {
            if v.len() != dim {
                return Err(Error::DimensionMismatch {
                    context: "pool embedding dimension",
                    expected: dim,
                    actual: v.len(),
                });
            }
            data.extend(v);
        }

        Self::new(candidates, fields, dim, data)
    }

    #[must_use]
    pub fn candidates(&self) -> usize {
        self.candidates
    }

    #[must_use]
    pub fn fields(&self) -> usize {
        self.fields
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The vector for one candidate's field.
    ///
    /// # Panics
    /// If `candidate` or `field` is out of range.
    #[must_use]
    pub fn get(&self, candidate: usize, field: usize) -> &[f32] {
        assert!(candidate < self.candidates && field < self.fields);
        let start = (candidate * self.fields + field) * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Flat view of every float, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vectors_layout() {
        let set = PoolEmbeddingSet::from_vectors(
            2,
            2,
            2,
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8], vec![0.8, 0.6]],
        )
        .unwrap();

        assert_eq!(set.get(0, 1), &[0.0, 1.0]);
        assert_eq!(set.get(1, 0), &[0.6, 0.8]);
        assert_eq!(set.as_slice().len(), 8);
    }

    #[test]
    fn test_wrong_count_is_rejected() {
        let err = PoolEmbeddingSet::from_vectors(2, 2, 2, vec![vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_wrong_dim_is_rejected() {
        let err = PoolEmbeddingSet::from_vectors(1, 1, 2, vec![vec![1.0, 0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_pool() {
        let set = PoolEmbeddingSet::from_vectors(0, 3, 4, vec![]).unwrap();
        assert_eq!(set.candidates(), 0);
        assert!(set.as_slice().is_empty());
    }
}
