//! WanderMatch CLI - find travel companions from questionnaire answers
//!
//! # Commands
//!
//! ```bash
//! # Rank a pool against one profile
//! wandermatch match data/user_pool.csv data/me.csv -k 5
//!
//! # Inspect or drop the cached pool embeddings
//! wandermatch cache status data/user_pool.csv
//! wandermatch cache clear data/user_pool.csv
//!
//! # Embed text and show vector stats
//! wandermatch embed "scuba diving in the Red Sea"
//! ```
//!
//! Set `RUST_LOG=wandermatch_lib=info` to follow the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wandermatch_lib::{
    cache::{CacheStatus, EmbeddingCache},
    embed::{l2_norm, BatchConfig, BatchEmbedder, BgeProvider, BgeSize, EmbeddingProvider, HashProvider},
    matcher::{MatchOutcome, MatchRequest, Matcher, MatcherConfig},
    profile::ProfileTable,
    rank::{WeightVector, DEFAULT_WEIGHTS},
};

/// Columns shown in the match summary when the pool has them.
const SUMMARY_COLUMNS: [&str; 4] = ["real_name", "nationality", "age_group", "bucket_list"];

#[derive(Parser)]
#[command(name = "wandermatch")]
#[command(about = "Match travellers by embedding their questionnaire answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    /// Local BAAI/bge model (downloaded on first use)
    Bge,
    /// Offline feature hashing
    Hash,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank every candidate in a pool against one profile
    Match {
        /// Candidate pool CSV
        pool: PathBuf,

        /// Query profile CSV (first row is used)
        query: PathBuf,

        /// Comma-separated field weights, one per column
        #[arg(short, long)]
        weights: Option<String>,

        /// Number of matches to return
        #[arg(short, default_value = "5")]
        k: usize,

        /// Directory for audit CSVs
        #[arg(long, default_value = "results/partner_matches")]
        out: PathBuf,

        /// Directory for the embeddings cache (default: next to the pool)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "bge")]
        provider: ProviderKind,

        /// BGE model size: "small", "base" or "large"
        #[arg(long, default_value = "small")]
        model: String,

        /// Texts per provider call
        #[arg(long, default_value = "64")]
        batch_size: usize,

        /// Provider calls in flight
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Timeout for one provider call
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the embeddings cache of a pool
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Embed text and show vector info
    Embed {
        /// Text to embed
        text: String,

        #[arg(long, value_enum, default_value = "bge")]
        provider: ProviderKind,

        /// BGE model size: "small", "base" or "large"
        #[arg(long, default_value = "small")]
        model: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show whether the cache is usable for the pool as it is now
    Status {
        pool: PathBuf,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Delete the cached embeddings
    Clear {
        pool: PathBuf,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

async fn load_provider(kind: ProviderKind, model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
    match kind {
        ProviderKind::Hash => Ok(Arc::new(HashProvider::default())),
        ProviderKind::Bge => {
            let size: BgeSize = model.parse()?;
            println!("Loading BGE {model} model (first run downloads it)...");
            let provider = tokio::task::spawn_blocking(move || BgeProvider::new(size)).await??;
            Ok(Arc::new(provider))
        }
    }
}

/// Explicit weights, the questionnaire defaults for a 12-column pool, or equal weights.
fn resolve_weights(weights: Option<&str>, pool: &Path) -> Result<WeightVector> {
    if let Some(w) = weights {
        return Ok(WeightVector::parse(w)?);
    }

    let fields = ProfileTable::load(pool)?.width();
    Ok(if fields == DEFAULT_WEIGHTS.len() {
        WeightVector::questionnaire()
    } else {
        WeightVector::uniform(fields)
    })
}

fn print_matches(outcome: &MatchOutcome) {
    let pool = &outcome.profiles.pool;
    let shown: Vec<(&str, usize)> = SUMMARY_COLUMNS
        .iter()
        .filter_map(|name| pool.column(name).map(|i| (*name, i)))
        .collect();

    let source = if outcome.cache_hit { "cached" } else { "freshly computed" };
    println!("\n=== Top {} matches ({source} pool embeddings) ===\n", outcome.matches.len());

    for (rank, m) in outcome.matches.iter().enumerate() {
        println!("#{} candidate {} (score: {:.4})", rank + 1, m.index + 1, m.score);
        if let Some(row) = pool.row(m.index) {
            for (name, i) in &shown {
                println!("  {name}: {}", row[*i]);
            }
        }
    }

    match &outcome.audit {
        Ok(files) => {
            println!("\nSimilarity matrix: {}", files.similarity_matrix.display());
            println!("Top matches:       {}", files.top_matches.display());
        }
        Err(e) => println!("\nAudit files not written: {e}"),
    }
}

fn matches_json(outcome: &MatchOutcome) -> serde_json::Value {
    let pool = &outcome.profiles.pool;
    let matches: Vec<_> = outcome
        .matches
        .iter()
        .map(|m| {
            let profile: serde_json::Map<String, serde_json::Value> = pool
                .header()
                .iter()
                .cloned()
                .zip(pool.row(m.index).into_iter().flatten().cloned().map(serde_json::Value::String))
                .collect();
            json!({ "index": m.index, "score": m.score, "profile": profile })
        })
        .collect();

    json!({
        "cache_hit": outcome.cache_hit,
        "matches": matches,
        "audit": outcome.audit.as_ref().ok(),
        "audit_error": outcome.audit.as_ref().err().map(ToString::to_string),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Match {
            pool,
            query,
            weights,
            k,
            out,
            cache_dir,
            provider,
            model,
            batch_size,
            concurrency,
            timeout_secs,
            json,
        } => {
            let weights = resolve_weights(weights.as_deref(), &pool)
                .with_context(|| format!("resolving weights for {}", pool.display()))?;
            debug!(weights = ?weights.as_slice(), "resolved field weights");
            let provider = load_provider(provider, &model).await?;

            let config = MatcherConfig {
                batch: BatchConfig {
                    batch_size,
                    concurrency,
                    timeout_ms: timeout_secs.saturating_mul(1000),
                    ..BatchConfig::default()
                },
                cache_dir,
                audit_dir: out,
            };
            let matcher = Matcher::new(provider, config);
            let request = MatchRequest {
                pool,
                query,
                weights,
                top_k: k,
            };

            let outcome = matcher.run(&request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&matches_json(&outcome))?);
            } else {
                print_matches(&outcome);
            }
        }

        Commands::Cache { action } => match action {
            CacheAction::Status { pool, cache_dir } => {
                let bytes = std::fs::read(&pool)
                    .with_context(|| format!("reading {}", pool.display()))?;
                let cache = EmbeddingCache::for_pool(&pool, cache_dir.as_deref());

                println!("Cache: {}", cache.blob_path().display());
                match cache.status(&bytes) {
                    CacheStatus::Missing => println!("Status: missing"),
                    CacheStatus::Stale { cached, current } => {
                        println!("Status: stale (pool changed)");
                        println!("  cached:  {cached}");
                        println!("  current: {current}");
                    }
                    CacheStatus::Valid {
                        candidates,
                        fields,
                        dim,
                        model,
                    } => {
                        println!("Status: valid");
                        println!("  {candidates} candidates x {fields} fields x {dim} dims");
                        println!("  model: {model}");
                    }
                    CacheStatus::Corrupt(reason) => println!("Status: corrupt ({reason})"),
                }
            }
            CacheAction::Clear { pool, cache_dir } => {
                let cache = EmbeddingCache::for_pool(&pool, cache_dir.as_deref());
                cache.clear()?;
                println!("Cleared {}", cache.blob_path().display());
            }
        },

        Commands::Embed {
            text,
            provider,
            model,
        } => {
            let provider = load_provider(provider, &model).await?;
            println!("Embedding with {}: {text}", provider.model_name());

            let embedder = BatchEmbedder::new(Arc::clone(&provider), BatchConfig::default());
            let embedding = embedder
                .embed_all(std::slice::from_ref(&text))
                .await?
                .into_iter()
                .next()
                .context("provider returned no embedding")?;

            println!("\nEmbedding stats:");
            println!("  Dimensions: {}", embedding.len());
            println!("  Norm: {:.4}", l2_norm(&embedding));
            println!("  First 5 values: {:?}", &embedding[..embedding.len().min(5)]);
            println!("  Min: {:.4}", embedding.iter().cloned().fold(f32::INFINITY, f32::min));
            println!("  Max: {:.4}", embedding.iter().cloned().fold(f32::NEG_INFINITY, f32::max));
        }
    }

    Ok(())
}
