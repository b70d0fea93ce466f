//! Vector store contract and backends.
//!
//! The processor depends only on the operations of [`VectorStore`]; backends
//! are enum variants (no trait objects): a Qdrant-compatible REST backend
//! and an in-process memory backend with identical semantics, used by tests
//! and available through config.

pub mod memory;
pub mod qdrant;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

/// Open-schema point payload: merged metadata plus the reserved system keys.
pub type Payload = Map<String, Value>;

/// Payload keys owned by the indexer. Enrichment must never contain them;
/// [`strip_reserved`] enforces that before sidecar writes.
pub const RESERVED_KEYS: [&str; 5] =
    ["file_path", "chunk_index", "total_chunks", "content_hash", "chunk_text"];

/// Remove the reserved system keys from `payload` in place.
pub fn strip_reserved(payload: &mut Payload) {
    for key in RESERVED_KEYS {
        payload.remove(key);
    }
}

/// One stored record: identity, vector, payload.
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// One search result, descending-score ordered by the backend.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: Payload,
}

/// One page of a collection scan plus the token for the next page.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<(Uuid, Payload)>,
    pub next_offset: Option<Value>,
}

/// Collection summary for `/status`.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub dimensions: usize,
    /// Field name to type name: integer, float, bool, keyword, text,
    /// keyword-array.
    pub payload_fields: Map<String, Value>,
}

/// All available vector store backends.
pub enum VectorStore {
    Qdrant(QdrantStore),
    Memory(MemoryStore),
}

impl VectorStore {
    /// Create the collection (configured dimensions, cosine distance) when
    /// absent. Idempotent.
    pub async fn ensure_collection(&self) -> Result<(), AppError> {
        match self {
            Self::Qdrant(s) => s.ensure_collection().await,
            Self::Memory(s) => s.ensure_collection().await,
        }
    }

    /// Write points and wait for durability. Retried with exponential
    /// backoff and jitter, up to 5 attempts.
    pub async fn upsert(&self, points: Vec<Point>) -> Result<(), AppError> {
        match self {
            Self::Qdrant(s) => s.upsert(points).await,
            Self::Memory(s) => s.upsert(points).await,
        }
    }

    /// Delete points by id; absent ids are not an error.
    pub async fn delete(&self, ids: Vec<Uuid>) -> Result<(), AppError> {
        match self {
            Self::Qdrant(s) => s.delete(ids).await,
            Self::Memory(s) => s.delete(ids).await,
        }
    }

    /// Field-level merge of `payload` into each existing point's payload.
    pub async fn set_payload(&self, ids: Vec<Uuid>, payload: Payload) -> Result<(), AppError> {
        match self {
            Self::Qdrant(s) => s.set_payload(ids, payload).await,
            Self::Memory(s) => s.set_payload(ids, payload).await,
        }
    }

    /// Full payload of one point, or `None` when the point is missing. Also
    /// `None` on transport errors, which the unchanged-content probe
    /// tolerates.
    pub async fn get_payload(&self, id: Uuid) -> Option<Payload> {
        match self {
            Self::Qdrant(s) => s.get_payload(id).await,
            Self::Memory(s) => s.get_payload(id).await,
        }
    }

    /// Top-`limit` nearest points, descending score.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<SearchHit>, AppError> {
        match self {
            Self::Qdrant(s) => s.search(vector, limit, filter).await,
            Self::Memory(s) => s.search(vector, limit, filter).await,
        }
    }

    /// One page of (id, payload) pairs; feed `next_offset` back in to
    /// continue the scan.
    pub async fn scroll(
        &self,
        filter: Option<Value>,
        page_size: usize,
        offset: Option<Value>,
    ) -> Result<ScrollPage, AppError> {
        match self {
            Self::Qdrant(s) => s.scroll(filter, page_size, offset).await,
            Self::Memory(s) => s.scroll(filter, page_size, offset).await,
        }
    }

    /// Point count, vector dimensions, and discovered payload-field schema.
    pub async fn collection_info(&self) -> Result<CollectionInfo, AppError> {
        match self {
            Self::Qdrant(s) => s.collection_info().await,
            Self::Memory(s) => s.collection_info().await,
        }
    }
}

/// Infer a payload field's type name from a sampled value.
///
/// Used when the backend has no indexed schema: integer, float, bool,
/// keyword, text (strings longer than 256), keyword-array.
pub(crate) fn infer_field_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Bool(_) => Some("bool"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer"),
        Value::Number(_) => Some("float"),
        Value::String(s) if s.len() > 256 => Some("text"),
        Value::String(_) => Some("keyword"),
        Value::Array(_) => Some("keyword-array"),
        Value::Null | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_reserved_removes_only_system_keys() {
        let mut payload: Payload = [
            ("file_path".to_string(), json!("/w/a.txt")),
            ("chunk_index".to_string(), json!(0)),
            ("total_chunks".to_string(), json!(1)),
            ("content_hash".to_string(), json!("abc")),
            ("chunk_text".to_string(), json!("hello")),
            ("domain".to_string(), json!("ops")),
        ]
        .into_iter()
        .collect();

        strip_reserved(&mut payload);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("domain"), Some(&json!("ops")));
    }

    #[test]
    fn field_types_infer_from_samples() {
        assert_eq!(infer_field_type(&json!(3)), Some("integer"));
        assert_eq!(infer_field_type(&json!(3.5)), Some("float"));
        assert_eq!(infer_field_type(&json!(true)), Some("bool"));
        assert_eq!(infer_field_type(&json!("short")), Some("keyword"));
        assert_eq!(infer_field_type(&json!("x".repeat(300))), Some("text"));
        assert_eq!(infer_field_type(&json!(["a", "b"])), Some("keyword-array"));
        assert_eq!(infer_field_type(&Value::Null), None);
    }
}
