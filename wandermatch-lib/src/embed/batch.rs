//! Batched, bounded-concurrency driver for an [`EmbeddingProvider`].
//!
//! Inputs are split into fixed-size batches. Each batch is a tokio task that
//! waits on a semaphore permit, then calls the provider on the blocking pool
//! under a timeout; transient failures are retried with exponential backoff.
//! Results are reassembled by batch index. The first permanent failure
//! aborts the remaining tasks and is returned; partial results are discarded.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::embed::{Embedding, EmbeddingProvider};
use crate::{Error, Result};

/// Tuning knobs for [`BatchEmbedder`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Texts per provider call
    pub batch_size: usize,
    /// Provider calls in flight at once
    pub concurrency: usize,
    /// Time budget for a single provider call
    pub timeout_ms: u64,
    /// Extra attempts for a transient failure
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 4,
            timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Drives a provider over many texts.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: BatchConfig,
}

impl BatchEmbedder {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: BatchConfig) -> Self {
        Self { provider, config }
    }

    /// Returns a reference to the wrapped provider.
    #[must_use]
    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Embed every text, returning vectors in input order.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts
            .chunks(self.config.batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        let workers = self.config.concurrency.clamp(1, batches.len());

        debug!(
            texts = texts.len(),
            batches = batches.len(),
            workers,
            model = self.provider.model_name(),
            "embedding batches"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let config = self.config.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Provider("embedding pool closed".to_string()))?;
                let vectors = call_with_retry(provider, batch, &config).await?;
                Ok::<_, Error>((index, vectors))
            });
        }

        let mut slots: Vec<Option<Vec<Embedding>>> = vec![None; batch_count];
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| Error::Provider(format!("embedding task failed: {e}")))
                .and_then(|result| result);
            match outcome {
                Ok((index, vectors)) => slots[index] = Some(vectors),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let mut out = Vec::with_capacity(texts.len());
        for vectors in slots.into_iter().flatten() {
            out.extend(vectors);
        }

        if out.len() != texts.len() {
            return Err(Error::Provider(format!(
                "embedded {} of {} texts",
                out.len(),
                texts.len()
            )));
        }
        Ok(out)
    }
}

async fn call_with_retry(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
    config: &BatchConfig,
) -> Result<Vec<Embedding>> {
    let texts = Arc::new(texts);
    let mut backoff = config.retry_backoff();
    let mut attempt = 0;

    loop {
        match call_once(Arc::clone(&provider), Arc::clone(&texts), config.timeout()).await {
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient provider failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            other => return other,
        }
    }
}

async fn call_once(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Arc<Vec<String>>,
    timeout: Duration,
) -> Result<Vec<Embedding>> {
    let inputs = texts.len();
    let dim = provider.dimension();

    // A blocking call cannot be cancelled: on timeout it finishes in the
    // background and its result is dropped.
    let call = tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        provider.embed(&refs)
    });

    let vectors = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => return Err(Error::Provider(format!("embedding call panicked: {e}"))),
        Err(_) => return Err(Error::ProviderTimeout(timeout)),
    };

    check_response(inputs, dim, &vectors)?;
    Ok(vectors)
}

fn check_response(inputs: usize, dim: usize, vectors: &[Embedding]) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::Provider(format!(
            "provider returned {} vectors for {inputs} inputs",
            vectors.len()
        )));
    }

    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::Provider(format!(
            "provider returned a {}-dimensional vector, expected {dim}",
            bad.len()
        )));
    }
    Ok(())
}
