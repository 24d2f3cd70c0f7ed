use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::embed::{Embedding, EmbeddingProvider};
use crate::{Error, Result};

/// Which BAAI/bge-*-en-v1.5 checkpoint to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BgeSize {
    /// 384 dimensions, ~130MB download
    #[default]
    Small,
    /// 768 dimensions, ~440MB download
    Base,
    /// 1024 dimensions, ~1.2GB download
    Large,
}

impl BgeSize {
    fn model(self) -> EmbeddingModel {
        match self {
            Self::Small => EmbeddingModel::BGESmallENV15,
            Self::Base => EmbeddingModel::BGEBaseENV15,
            Self::Large => EmbeddingModel::BGELargeENV15,
        }
    }

    fn model_name(self) -> &'static str {
        match self {
            Self::Small => "BAAI/bge-small-en-v1.5",
            Self::Base => "BAAI/bge-base-en-v1.5",
            Self::Large => "BAAI/bge-large-en-v1.5",
        }
    }

    fn dimension(self) -> usize {
        match self {
            Self::Small => 384,
            Self::Base => 768,
            Self::Large => 1024,
        }
    }
}

impl std::str::FromStr for BgeSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "base" => Ok(Self::Base),
            "large" => Ok(Self::Large),
            other => Err(Error::Provider(format!("unknown bge model size '{other}'"))),
        }
    }
}

/// BGE embedder backed by fastembed's ONNX runtime.
///
/// Answers are compared field against field, so both sides of a comparison
/// are embedded the same way: no query instruction prefix is added. fastembed
/// returns L2-normalized vectors for these models.
pub struct BgeProvider {
    model: Mutex<TextEmbedding>,
    size: BgeSize,
}

impl BgeProvider {
    /// Create a new BGE provider.
    ///
    /// Downloads the model on first use.
    pub fn new(size: BgeSize) -> Result<Self> {
        let opts = InitOptions::new(size.model()).with_show_download_progress(true);

        TextEmbedding::try_new(opts)
            .map(|model| Self {
                model: Mutex::new(model),
                size,
            })
            .map_err(|e| Error::Provider(e.to_string()))
    }
}

impl EmbeddingProvider for BgeProvider {
    fn model_name(&self) -> &str {
        self.size.model_name()
    }

    fn dimension(&self) -> usize {
        self.size.dimension()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| Error::Provider("embedding model lock poisoned".to_string()))?;

        model
            .embed(texts, None)
            .map_err(|e| Error::Provider(e.to_string()))
    }
}
