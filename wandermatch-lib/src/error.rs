//! Error types for WanderMatch

use std::time::Duration;

use thiserror::Error;

/// Result type alias for WanderMatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while matching profiles
#[derive(Error, Debug)]
pub enum Error {
    /// Pool or query could not be read or parsed, or their field counts disagree
    #[error("data format error: {0}")]
    DataFormat(String),

    /// The embedding provider failed and retrying will not help
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// The embedding provider failed in a way that may succeed on retry
    #[error("transient embedding provider error: {0}")]
    ProviderTransient(String),

    /// A single provider call exceeded its time budget
    #[error("embedding provider call timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// Stored embeddings could not be decoded or have the wrong shape
    #[error("embedding cache corrupted: {0}")]
    CacheCorruption(String),

    /// Two things that must have the same length do not
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Audit artifacts could not be written
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether the failed operation is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderTransient(_) | Self::ProviderTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(Error::ProviderTransient("rate limited".into()).is_transient());
        assert!(Error::ProviderTimeout(Duration::from_secs(1)).is_transient());
        assert!(!Error::Provider("bad model".into()).is_transient());
        assert!(!Error::DataFormat("oops".into()).is_transient());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            context: "weights",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch in weights: expected 3, got 2"
        );
    }
}
