//! WanderMatch - profile embedding and matching engine
//!
//! Scores a pool of traveller profiles against one querying profile by
//! embedding every questionnaire answer and comparing answers field by field.
//!
//! # Architecture
//!
//! ```text
//! pool.csv -> Profile -> Cache? --miss--> BatchEmbedder -> Cache
//!                          |                   |
//!                         hit                  v
//!                          +------------> PoolEmbeddingSet
//!                                              |
//! query.csv -> Profile -> BatchEmbedder -> Similarity -> Rank -> Audit
//!                                                          |
//!                                                       Matches
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wandermatch_lib::{
//!     embed::{BgeProvider, BgeSize},
//!     matcher::{MatchRequest, Matcher, MatcherConfig},
//!     rank::WeightVector,
//! };
//!
//! let provider = Arc::new(BgeProvider::new(BgeSize::Small)?);
//! let matcher = Matcher::new(provider, MatcherConfig::default());
//!
//! let outcome = matcher.run(&MatchRequest {
//!     pool: "data/pool.csv".into(),
//!     query: "data/me.csv".into(),
//!     weights: WeightVector::questionnaire(),
//!     top_k: 5,
//! }).await?;
//!
//! for m in &outcome.matches {
//!     println!("candidate {} scored {:.3}", m.index, m.score);
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod embed;
pub mod error;
pub mod matcher;
pub mod profile;
pub mod rank;
pub mod similarity;

pub use error::{Error, Result};
