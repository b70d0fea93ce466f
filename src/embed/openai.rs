//! OpenAI-compatible embeddings provider (`/v1/embeddings`).
//!
//! Covers OpenAI and compatible local servers. Wire types are private to
//! this module. One request embeds a whole batch; results are reordered by
//! the response's `index` field before returning.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;

pub struct OpenAiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local endpoints; when present it is
    /// sent as `Authorization: Bearer <key>`.
    pub fn new(
        api_base_url: String,
        model: String,
        dimensions: usize,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Embed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, dimensions, api_key })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingsRequest { model: &self.model, input: texts };
        debug!(model = %self.model, batch = texts.len(), "sending embeddings request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AppError::Embed(format!("embeddings request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embed(format!("embeddings endpoint returned {status}: {body}")));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embed(format!("decode embeddings response: {e}")))?;

        if body.data.len() != texts.len() {
            return Err(AppError::Embed(format!(
                "embeddings endpoint returned {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
