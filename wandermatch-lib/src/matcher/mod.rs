//! End-to-end matching pipeline
//!
//! Loads a candidate pool and a query profile, reuses or recomputes the
//! pool embeddings, scores every candidate and writes audit artifacts.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use wandermatch_lib::embed::HashProvider;
//! use wandermatch_lib::matcher::{MatchRequest, Matcher, MatcherConfig};
//! use wandermatch_lib::rank::WeightVector;
//!
//! let matcher = Matcher::new(Arc::new(HashProvider::default()), MatcherConfig::default());
//! let outcome = matcher.run(&MatchRequest {
//!     pool: "pool.csv".into(),
//!     query: "me.csv".into(),
//!     weights: WeightVector::questionnaire(),
//!     top_k: 5,
//! }).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::audit::{AuditArtifacts, AuditWriter};
use crate::cache::{CacheShape, EmbeddingCache};
use crate::embed::{BatchConfig, BatchEmbedder, EmbeddingProvider, PoolEmbeddingSet};
use crate::profile::{load_pair, LoadedProfiles};
use crate::rank::{rank, Match, WeightVector};
use crate::similarity::SimilarityMatrix;
use crate::{Error, Result};

/// Engine settings. The engine reads nothing from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub batch: BatchConfig,
    /// Cache directory; `None` keeps the cache next to the pool file
    pub cache_dir: Option<PathBuf>,
    pub audit_dir: PathBuf,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            cache_dir: None,
            audit_dir: PathBuf::from("results/partner_matches"),
        }
    }
}

/// One matching run.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub pool: PathBuf,
    pub query: PathBuf,
    pub weights: WeightVector,
    pub top_k: usize,
}

/// Result of a run.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Best candidates, highest score first
    pub matches: Vec<Match>,
    pub similarity: SimilarityMatrix,
    /// Pool embeddings came from the cache
    pub cache_hit: bool,
    /// Audit files, or why they could not be written
    pub audit: Result<AuditArtifacts>,
    pub profiles: LoadedProfiles,
}

pub struct Matcher {
    embedder: BatchEmbedder,
    config: MatcherConfig,
}

impl Matcher {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: MatcherConfig) -> Self {
        Self {
            embedder: BatchEmbedder::new(provider, config.batch.clone()),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Cache used for a given pool file under this configuration.
    #[must_use]
    pub fn cache_for(&self, pool: &Path) -> EmbeddingCache {
        EmbeddingCache::for_pool(pool, self.config.cache_dir.as_deref())
    }

    /// Run the full pipeline for one request.
    ///
    /// Input and weight errors surface before any provider call. An unusable
    /// cache location or audit directory does not fail the run.
    pub async fn run(&self, request: &MatchRequest) -> Result<MatchOutcome> {
        let profiles = load_pair(&request.pool, &request.query)?;
        request.weights.check(profiles.pool.width())?;

        info!(
            pool = %request.pool.display(),
            candidates = profiles.pool.len(),
            fields = profiles.pool.width(),
            "matching against pool"
        );

        let cache = self.cache_for(&request.pool);
        let (pool_set, cache_hit) = self.pool_embeddings(&cache, &profiles).await?;

        let query = self.embedder.embed_all(&profiles.query).await?;
        let similarity = SimilarityMatrix::compute(&query, &pool_set)?;
        let matches = rank(&similarity, &request.weights, request.top_k)?;

        info!(
            returned = matches.len(),
            best = matches.first().map(|m| m.score),
            "ranked candidates"
        );

        let audit = AuditWriter::new(&self.config.audit_dir).write(
            &similarity,
            &matches,
            &profiles.pool,
        );
        if let Err(e) = &audit {
            warn!(error = %e, "failed to write audit artifacts");
        }

        Ok(MatchOutcome {
            matches,
            similarity,
            cache_hit,
            audit,
            profiles,
        })
    }

    async fn pool_embeddings(
        &self,
        cache: &EmbeddingCache,
        profiles: &LoadedProfiles,
    ) -> Result<(PoolEmbeddingSet, bool)> {
        let provider = self.embedder.provider();
        let shape = CacheShape {
            candidates: profiles.pool.len(),
            fields: profiles.pool.width(),
            dim: provider.dimension(),
            model: provider.model_name().to_string(),
        };

        // flock blocks, so wait for it off the async workers
        let locking = cache.clone();
        let lock = tokio::task::spawn_blocking(move || locking.lock())
            .await
            .map_err(|e| Error::Persistence(format!("cache lock task failed: {e}")))
            .and_then(|result| result);

        let _lock = match lock {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "embeddings cache unavailable; computing without it");
                let set = self.embed_pool(&shape, profiles).await?;
                return Ok((set, false));
            }
        };

        if let Some(set) = cache.load(&profiles.pool_bytes, &shape) {
            return Ok((set, true));
        }

        let set = self.embed_pool(&shape, profiles).await?;

        if let Err(e) = cache.store(&profiles.pool_bytes, &set, &shape.model) {
            warn!(error = %e, "failed to save pool embeddings; next run will recompute");
        }

        Ok((set, false))
    }

    async fn embed_pool(
        &self,
        shape: &CacheShape,
        profiles: &LoadedProfiles,
    ) -> Result<PoolEmbeddingSet> {
        info!(
            texts = shape.candidates * shape.fields,
            model = %shape.model,
            "computing pool embeddings"
        );
        let vectors = self.embedder.embed_all(&profiles.pool.flattened()).await?;
        PoolEmbeddingSet::from_vectors(shape.candidates, shape.fields, shape.dim, vectors)
    }
}
