use crate::embed::{l2_norm, Embedding, EmbeddingProvider};
use crate::Result;

/// Deterministic feature-hashing embedder.
///
/// Lowercased word tokens are hashed with blake3 into a fixed number of
/// buckets with a hashed sign, then the vector is L2-normalized. Texts that
/// share words land close together; identical texts are identical vectors.
/// No model download, no network: useful for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashProvider {
    dimension: usize,
}

impl HashProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&bytes[..8]);
        let idx = (u64::from_le_bytes(idx) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];

        let lower = text.to_lowercase();
        let mut tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        // punctuation-only or empty text still needs a direction
        if tokens.is_empty() {
            tokens.push(lower.as_str());
        }

        for token in tokens {
            let (idx, sign) = self.bucket(token);
            vector[idx] += sign;
        }

        let norm = l2_norm(&vector);
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for HashProvider {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-v1"
    }
}
