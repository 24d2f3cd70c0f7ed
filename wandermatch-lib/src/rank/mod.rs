//! Weighted aggregation and top-K selection
//!
//! A candidate's score is the weighted sum of its per-field similarities.
//! Weights express relative importance and need not sum to one. Candidates
//! are ordered by descending score; ties keep ascending pool order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::similarity::SimilarityMatrix;
use crate::{Error, Result};

/// Weights for the twelve-question travel questionnaire, in column order:
/// real_name, age_group, gender, nationality, preferred_residence,
/// cultural_symbol, bucket_list, healthcare_expectations, travel_budget,
/// currency_preferences, insurance_type, past_insurance_issues.
pub const DEFAULT_WEIGHTS: [f32; 12] = [
    0.0, 0.2, 0.1, 0.3, 0.1, 0.3, 0.3, 0.1, 0.3, 0.1, 0.1, 0.1,
];

/// One weight per profile field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector(Vec<f32>);

impl WeightVector {
    #[must_use]
    pub fn new(weights: Vec<f32>) -> Self {
        Self(weights)
    }

    /// Every field weighted `1 / fields`.
    #[must_use]
    pub fn uniform(fields: usize) -> Self {
        if fields == 0 {
            return Self(Vec::new());
        }
        Self(vec![1.0 / fields as f32; fields])
    }

    /// The questionnaire defaults.
    #[must_use]
    pub fn questionnaire() -> Self {
        Self(DEFAULT_WEIGHTS.to_vec())
    }

    /// Parse a comma-separated list such as `0.5, 0.25,0.25`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }

        s.split(',')
            .map(str::trim)
            .map(|t| {
                if t.is_empty() {
                    return Err(Error::DataFormat(format!("empty weight in '{s}'")));
                }
                t.parse::<f32>()
                    .ok()
                    .filter(|w| w.is_finite())
                    .ok_or_else(|| Error::DataFormat(format!("invalid weight '{t}'")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Fail unless there is exactly one weight per field.
    pub fn check(&self, fields: usize) -> Result<()> {
        if self.0.len() != fields {
            return Err(Error::DimensionMismatch {
                context: "weights",
                expected: fields,
                actual: self.0.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for WeightVector {
    fn from(weights: Vec<f32>) -> Self {
        Self(weights)
    }
}

/// A ranked candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    /// Row of the candidate in the pool (0-based)
    pub index: usize,
    /// Weighted sum of per-field similarities
    pub score: f32,
}

/// Weighted score of every candidate, in pool order.
pub fn scores(matrix: &SimilarityMatrix, weights: &WeightVector) -> Result<Vec<f32>> {
    weights.check(matrix.fields())?;

    Ok(matrix
        .rows()
        .map(|row| row.iter().zip(weights.as_slice()).map(|(s, w)| s * w).sum())
        .collect())
}

/// The `k` best candidates, highest score first.
///
/// The sort is stable, so equal scores stay in ascending index order. NaN
/// scores sort after every other score, `-inf` included, and keep index
/// order among themselves.
pub fn rank(matrix: &SimilarityMatrix, weights: &WeightVector, k: usize) -> Result<Vec<Match>> {
    let mut matches: Vec<Match> = scores(matrix, weights)?
        .into_iter()
        .enumerate()
        .map(|(index, score)| Match { index, score })
        .collect();

    matches.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    });
    matches.truncate(k);

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f32>>) -> SimilarityMatrix {
        SimilarityMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_weighted_sum_identity_matrix() {
        let m = matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let w = WeightVector::new(vec![0.5, 0.5]);

        let s = scores(&m, &w).unwrap();
        assert_eq!(s, vec![0.5, 0.5]);

        let ranked = rank(&m, &w, 2).unwrap();
        assert_eq!(ranked[0], Match { index: 0, score: 0.5 });
        assert_eq!(ranked[1], Match { index: 1, score: 0.5 });
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let m = matrix(vec![vec![1.0, 1.0]]);
        let s = scores(&m, &WeightVector::new(vec![2.0, 3.0])).unwrap();
        assert!((s[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_descending() {
        let m = matrix(vec![vec![0.1], vec![0.9], vec![0.5]]);
        let ranked = rank(&m, &WeightVector::new(vec![1.0]), 3).unwrap();

        let order: Vec<usize> = ranked.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_keep_pool_order() {
        let m = matrix(vec![
            vec![0.3],
            vec![0.7],
            vec![0.3],
            vec![0.7],
            vec![0.3],
        ]);
        let w = WeightVector::new(vec![1.0]);

        let first = rank(&m, &w, 5).unwrap();
        let order: Vec<usize> = first.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![1, 3, 0, 2, 4]);

        for _ in 0..10 {
            assert_eq!(rank(&m, &w, 5).unwrap(), first);
        }
    }

    #[test]
    fn test_truncates_to_k() {
        let m = matrix(vec![vec![0.1], vec![0.2], vec![0.3]]);
        let w = WeightVector::new(vec![1.0]);

        assert_eq!(rank(&m, &w, 2).unwrap().len(), 2);
        assert_eq!(rank(&m, &w, 10).unwrap().len(), 3);
        assert!(rank(&m, &w, 0).unwrap().is_empty());
    }

    #[test]
    fn test_weight_length_mismatch() {
        let m = matrix(vec![vec![1.0, 0.0]]);
        let err = rank(&m, &WeightVector::new(vec![1.0, 0.0, 0.0]), 1).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_similarity() {
        let m = matrix(vec![vec![-0.5], vec![0.0]]);
        let ranked = rank(&m, &WeightVector::new(vec![1.0]), 2).unwrap();
        assert_eq!(ranked[0].index, 1);
        assert!((ranked[1].score + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nan_sorts_last() {
        let m = matrix(vec![vec![f32::NAN], vec![-0.9], vec![0.2]]);
        let ranked = rank(&m, &WeightVector::new(vec![1.0]), 3).unwrap();

        let order: Vec<usize> = ranked.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_nan_after_negative_infinity() {
        let m = matrix(vec![
            vec![f32::NAN],
            vec![f32::NEG_INFINITY],
            vec![f32::NAN],
            vec![0.2],
        ]);
        let ranked = rank(&m, &WeightVector::new(vec![1.0]), 4).unwrap();

        let order: Vec<usize> = ranked.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![3, 1, 0, 2]);
    }

    #[test]
    fn test_parse_weights() {
        let w = WeightVector::parse("0.5, 0.25,0.25").unwrap();
        assert_eq!(w.as_slice(), &[0.5, 0.25, 0.25]);

        assert!(WeightVector::parse("0.5,abc").is_err());
        assert!(WeightVector::parse("inf").is_err());
        assert!(WeightVector::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_entries() {
        for input in ["0.5,,0.5", "0.5,0.5,", ",1"] {
            let err = WeightVector::parse(input).unwrap_err();
            assert!(matches!(err, Error::DataFormat(_)), "{input}");
        }
    }

    #[test]
    fn test_uniform_and_defaults() {
        let w = WeightVector::uniform(4);
        assert_eq!(w.as_slice(), &[0.25; 4]);
        assert_eq!(WeightVector::questionnaire().len(), 12);
    }
}
