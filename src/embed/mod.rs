//! Embedding provider abstraction.
//!
//! `Embedder` is an enum over concrete provider implementations; enum
//! dispatch keeps callers free of trait-object machinery. Providers are
//! constructed once at startup and shared.

pub mod hash;
pub mod openai;

use crate::error::AppError;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

/// All available embedding backends.
pub enum Embedder {
    /// Any HTTP endpoint implementing `/v1/embeddings`.
    OpenAi(OpenAiEmbedder),
    /// Deterministic offline embedding derived from a content digest.
    Hash(HashEmbedder),
}

impl Embedder {
    /// Vector length every embedding call must produce. The collection is
    /// created with this size; the processor rejects mismatches.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::OpenAi(p) => p.dimensions(),
            Self::Hash(p) => p.dimensions(),
        }
    }

    /// Embed a batch of texts in one call, preserving order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match self {
            Self::OpenAi(p) => p.embed(texts).await,
            Self::Hash(p) => p.embed(texts).await,
        }
    }
}
