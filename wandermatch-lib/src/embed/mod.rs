//! Text embedding providers
//!
//! Every profile field is turned into a vector by an [`EmbeddingProvider`].
//! Providers are passed into the matcher explicitly, so tests can swap in a
//! stub and the engine carries no process-wide client state.
//!
//! # Contract
//!
//! - One vector per input string, in input order
//! - Every vector has [`EmbeddingProvider::dimension`] entries
//! - Every vector has unit length, so cosine similarity is a plain dot product
//!
//! # Usage
//!
//! ```ignore
//! use wandermatch_lib::embed::{BgeProvider, BgeSize, EmbeddingProvider};
//!
//! let provider = BgeProvider::new(BgeSize::Small)?;
//! let vectors = provider.embed(&["hiking", "scuba diving"])?;
//! ```

use crate::Result;

/// A vector embedding - fixed size array of floats
pub type Embedding = Vec<f32>;

/// Trait for text embedding models
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// Implementations may batch internally, but must return exactly one
    /// vector per input, in the same order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Returns the embedding dimension
    fn dimension(&self) -> usize;

    /// Returns the model name/identifier
    fn model_name(&self) -> &str;
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub mod batch;
mod bge;
mod hash;
mod set;

pub use batch::{BatchConfig, BatchEmbedder};
pub use bge::*;
pub use hash::*;
pub use set::PoolEmbeddingSet;
