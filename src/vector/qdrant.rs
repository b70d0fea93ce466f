//! Qdrant REST backend.
//!
//! Speaks the collections/points HTTP API of a Qdrant-compatible server.
//! Wire types are private to this module; callers see only the
//! [`VectorStore`](super::VectorStore) operations. Mutations pass
//! `wait=true` so durability is settled before the call returns, and are
//! retried with exponential backoff plus jitter.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CollectionInfo, Payload, Point, ScrollPage, SearchHit, infer_field_type};
use crate::error::AppError;

const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(10);
const RETRY_JITTER_MS: u64 = 250;

/// How many points to sample when the server reports no indexed payload
/// schema.
const SCHEMA_SAMPLE: usize = 100;

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl QdrantStore {
    pub fn new(
        url: String,
        collection: String,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Vector(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            collection,
            api_key,
            dimensions,
        })
    }

    pub async fn ensure_collection(&self) -> Result<(), AppError> {
        let url = self.collection_url("");
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::Vector(format!("probe collection: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(collection = %self.collection, dimensions = self.dimensions, "creating collection");
                let body = json!({
                    "vectors": { "size": self.dimensions, "distance": "Cosine" }
                });
                let response = self
                    .request(self.client.put(&url))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AppError::Vector(format!("create collection: {e}")))?;
                check_status("create collection", response).await?;
                Ok(())
            }
            status if status.is_success() => Ok(()),
            _ => {
                check_status("probe collection", response).await?;
                Ok(())
            }
        }
    }

    pub async fn upsert(&self, points: Vec<Point>) -> Result<(), AppError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points });
        let url = format!("{}?wait=true", self.collection_url("/points"));
        self.with_retry("upsert", || {
            self.request(self.client.put(&url)).json(&body)
        })
        .await
    }

    pub async fn delete(&self, ids: Vec<Uuid>) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        let url = format!("{}?wait=true", self.collection_url("/points/delete"));
        self.with_retry("delete", || {
            self.request(self.client.post(&url)).json(&body)
        })
        .await
    }

    pub async fn set_payload(&self, ids: Vec<Uuid>, payload: Payload) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids, "payload": payload });
        let url = format!("{}?wait=true", self.collection_url("/points/payload"));
        self.with_retry("set payload", || {
            self.request(self.client.post(&url)).json(&body)
        })
        .await
    }

    pub async fn get_payload(&self, id: Uuid) -> Option<Payload> {
        let url = self.collection_url(&format!("/points/{id}"));
        let response = self.request(self.client.get(&url)).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: ApiResponse<RetrievedPoint> = response.json().await.ok()?;
        Some(body.result.payload.unwrap_or_default())
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        let url = self.collection_url("/points/search");
        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Vector(format!("search: {e}")))?;
        let response = check_status("search", response).await?;
        let body: ApiResponse<Vec<ScoredPoint>> = response
            .json()
            .await
            .map_err(|e| AppError::Vector(format!("search: decode response: {e}")))?;

        Ok(body
            .result
            .into_iter()
            .map(|p| SearchHit { id: p.id, score: p.score, payload: p.payload.unwrap_or_default() })
            .collect())
    }

    pub async fn scroll(
        &self,
        filter: Option<Value>,
        page_size: usize,
        offset: Option<Value>,
    ) -> Result<ScrollPage, AppError> {
        let mut body = json!({
            "limit": page_size,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        if let Some(offset) = offset {
            body["offset"] = offset;
        }
        let url = self.collection_url("/points/scroll");
        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Vector(format!("scroll: {e}")))?;
        let response = check_status("scroll", response).await?;
        let body: ApiResponse<ScrollResult> = response
            .json()
            .await
            .map_err(|e| AppError::Vector(format!("scroll: decode response: {e}")))?;

        Ok(ScrollPage {
            points: body
                .result
                .points
                .into_iter()
                .map(|p| (p.id, p.payload.unwrap_or_default()))
                .collect(),
            next_offset: body.result.next_page_offset,
        })
    }

    pub async fn collection_info(&self) -> Result<CollectionInfo, AppError> {
        let url = self.collection_url("");
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::Vector(format!("collection info: {e}")))?;
        let response = check_status("collection info", response).await?;
        let body: ApiResponse<CollectionDescription> = response
            .json()
            .await
            .map_err(|e| AppError::Vector(format!("collection info: decode response: {e}")))?;

        let desc = body.result;
        let dimensions = desc
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors.as_ref())
            .and_then(|v| v.size)
            .unwrap_or(self.dimensions);

        let payload_fields = if desc.payload_schema.is_empty() {
            self.sample_payload_fields().await?
        } else {
            desc.payload_schema
                .into_iter()
                .map(|(k, v)| (k, Value::String(v.data_type)))
                .collect()
        };

        Ok(CollectionInfo {
            points_count: desc.points_count.unwrap_or(0),
            dimensions,
            payload_fields,
        })
    }

    /// Infer the payload schema from a bounded sample when the server has
    /// no indexed schema to report.
    async fn sample_payload_fields(&self) -> Result<Payload, AppError> {
        let page = self.scroll(None, SCHEMA_SAMPLE, None).await?;
        let mut fields = Payload::new();
        for (_, payload) in page.points {
            for (key, value) in payload {
                if !fields.contains_key(&key) {
                    if let Some(ty) = infer_field_type(&value) {
                        fields.insert(key, Value::String(ty.to_string()));
                    }
                }
            }
        }
        Ok(fields)
    }

    async fn with_retry<F>(&self, op: &str, build: F) -> Result<(), AppError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1u32;
        loop {
            let outcome = match build().send().await {
                Ok(response) => check_status(op, response).await.map(|_| ()),
                Err(e) => Err(AppError::Vector(format!("{op}: {e}"))),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= RETRY_ATTEMPTS => {
                    return Err(AppError::Vector(format!(
                        "{op} failed after {RETRY_ATTEMPTS} attempts: {e}"
                    )));
                }
                Err(e) => {
                    let delay = retry_delay(attempt);
                    warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "vector store retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.base_url, self.collection)
    }
}

/// `min(cap, base * 2^(attempt-1))` plus up to 250 ms of jitter.
fn retry_delay(attempt: u32) -> Duration {
    let backoff = RETRY_BASE.saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = backoff.min(RETRY_CAP);
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_JITTER_MS))
}

async fn check_status(op: &str, response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Vector(format!("{op}: HTTP {status}: {body}")))
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    #[allow(dead_code)]
    id: Uuid,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Uuid,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    id: Uuid,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    config: Option<CollectionConfig>,
    #[serde(default)]
    payload_schema: std::collections::BTreeMap<String, PayloadFieldSchema>,
}

#[derive(Deserialize)]
struct CollectionConfig {
    #[serde(default)]
    params: Option<CollectionParams>,
}

#[derive(Deserialize)]
struct CollectionParams {
    #[serde(default)]
    vectors: Option<VectorParams>,
}

#[derive(Deserialize)]
struct VectorParams {
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Deserialize)]
struct PayloadFieldSchema {
    data_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_capped() {
        for attempt in 1..=10 {
            let d = retry_delay(attempt);
            assert!(d <= RETRY_CAP + Duration::from_millis(RETRY_JITTER_MS));
        }
        // First attempt starts at the base.
        assert!(retry_delay(1) >= RETRY_BASE);
    }

    #[test]
    fn urls_are_rooted_at_the_collection() {
        let store = QdrantStore::new(
            "http://localhost:6333/".to_string(),
            "jeeves".to_string(),
            None,
            384,
        )
        .expect("store");
        assert_eq!(store.collection_url(""), "http://localhost:6333/collections/jeeves");
        assert_eq!(
            store.collection_url("/points/search"),
            "http://localhost:6333/collections/jeeves/points/search"
        );
    }
}
