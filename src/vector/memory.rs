//! In-process vector store backend.
//!
//! Same semantics as the Qdrant backend over a mutex-guarded map, with
//! brute-force cosine search. Deterministic and dependency-free, so tests
//! and local experimentation run against it.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{Number, Value};
use uuid::Uuid;

use super::{CollectionInfo, Payload, Point, ScrollPage, SearchHit, infer_field_type};
use crate::error::AppError;

const SCHEMA_SAMPLE: usize = 100;

#[derive(Debug, Clone)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: Payload,
}

pub struct MemoryStore {
    dimensions: usize,
    // BTreeMap keeps scroll order stable across calls.
    points: Mutex<BTreeMap<Uuid, StoredPoint>>,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, points: Mutex::new(BTreeMap::new()) }
    }

    pub async fn ensure_collection(&self) -> Result<(), AppError> {
        Ok(())
    }

    pub async fn upsert(&self, points: Vec<Point>) -> Result<(), AppError> {
        let mut map = self.lock();
        for p in points {
            if p.vector.len() != self.dimensions {
                return Err(AppError::Vector(format!(
                    "upsert: vector length {} does not match collection dimensions {}",
                    p.vector.len(),
                    self.dimensions
                )));
            }
            map.insert(p.id, StoredPoint { vector: p.vector, payload: p.payload });
        }
        Ok(())
    }

    pub async fn delete(&self, ids: Vec<Uuid>) -> Result<(), AppError> {
        let mut map = self.lock();
        for id in ids {
            map.remove(&id);
        }
        Ok(())
    }

    pub async fn set_payload(&self, ids: Vec<Uuid>, payload: Payload) -> Result<(), AppError> {
        let mut map = self.lock();
        for id in ids {
            if let Some(point) = map.get_mut(&id) {
                for (k, v) in &payload {
                    point.payload.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }

    pub async fn get_payload(&self, id: Uuid) -> Option<Payload> {
        self.lock().get(&id).map(|p| p.payload.clone())
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let map = self.lock();
        let mut hits: Vec<SearchHit> = map
            .iter()
            .filter(|(_, p)| matches_filter(&p.payload, filter.as_ref()))
            .map(|(id, p)| SearchHit {
                id: *id,
                score: cosine(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn scroll(
        &self,
        filter: Option<Value>,
        page_size: usize,
        offset: Option<Value>,
    ) -> Result<ScrollPage, AppError> {
        let start = offset.as_ref().and_then(Value::as_u64).unwrap_or(0) as usize;
        let map = self.lock();
        let matching: Vec<(Uuid, Payload)> = map
            .iter()
            .filter(|(_, p)| matches_filter(&p.payload, filter.as_ref()))
            .map(|(id, p)| (*id, p.payload.clone()))
            .collect();

        let end = (start + page_size).min(matching.len());
        let points = matching.get(start..end).unwrap_or_default().to_vec();
        let next_offset = (end < matching.len()).then(|| Value::Number(Number::from(end as u64)));
        Ok(ScrollPage { points, next_offset })
    }

    pub async fn collection_info(&self) -> Result<CollectionInfo, AppError> {
        let map = self.lock();
        let mut payload_fields = Payload::new();
        for point in map.values().take(SCHEMA_SAMPLE) {
            for (key, value) in &point.payload {
                if !payload_fields.contains_key(key) {
                    if let Some(ty) = infer_field_type(value) {
                        payload_fields.insert(key.clone(), Value::String(ty.to_string()));
                    }
                }
            }
        }
        Ok(CollectionInfo {
            points_count: map.len() as u64,
            dimensions: self.dimensions,
            payload_fields,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Uuid, StoredPoint>> {
        self.points.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

/// Minimal filter support: `{"must": [{"key": k, "match": {"value": v}}]}`.
/// Array payload fields match when they contain the value.
fn matches_filter(payload: &Payload, filter: Option<&Value>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some(must) = filter.get("must").and_then(Value::as_array) else {
        return true;
    };
    must.iter().all(|cond| {
        let Some(key) = cond.get("key").and_then(Value::as_str) else {
            return false;
        };
        let Some(expected) = cond.get("match").and_then(|m| m.get("value")) else {
            return false;
        };
        match payload.get(key) {
            Some(Value::Array(items)) => items.contains(expected),
            Some(actual) => actual == expected,
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn point(id: u128, vector: Vec<f32>, pairs: &[(&str, Value)]) -> Point {
        Point { id: Uuid::from_u128(id), vector, payload: payload(pairs) }
    }

    #[tokio::test]
    async fn upsert_get_delete_round_trip() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![point(1, vec![1.0, 0.0], &[("k", json!("v"))])])
            .await
            .expect("upsert");

        let got = store.get_payload(Uuid::from_u128(1)).await.expect("present");
        assert_eq!(got.get("k"), Some(&json!("v")));

        store.delete(vec![Uuid::from_u128(1), Uuid::from_u128(99)]).await.expect("delete");
        assert!(store.get_payload(Uuid::from_u128(1)).await.is_none());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryStore::new(3);
        let result = store.upsert(vec![point(1, vec![1.0], &[])]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn search_orders_by_cosine_descending() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![
                point(1, vec![1.0, 0.0], &[("name", json!("east"))]),
                point(2, vec![0.0, 1.0], &[("name", json!("north"))]),
                point(3, vec![0.7, 0.7], &[("name", json!("diag"))]),
            ])
            .await
            .expect("upsert");

        let hits = store.search(vec![1.0, 0.0], 2, None).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.get("name"), Some(&json!("east")));
        assert_eq!(hits[1].payload.get("name"), Some(&json!("diag")));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn search_filter_narrows_results() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![
                point(1, vec![1.0, 0.0], &[("domain", json!("ops"))]),
                point(2, vec![1.0, 0.0], &[("domain", json!("docs"))]),
            ])
            .await
            .expect("upsert");

        let filter = json!({"must": [{"key": "domain", "match": {"value": "ops"}}]});
        let hits = store.search(vec![1.0, 0.0], 10, Some(filter)).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn set_payload_merges_field_level() {
        let store = MemoryStore::new(1);
        store
            .upsert(vec![point(1, vec![1.0], &[("a", json!(1)), ("b", json!(2))])])
            .await
            .expect("upsert");

        store
            .set_payload(vec![Uuid::from_u128(1)], payload(&[("b", json!(20)), ("c", json!(3))]))
            .await
            .expect("set payload");

        let got = store.get_payload(Uuid::from_u128(1)).await.expect("present");
        assert_eq!(got.get("a"), Some(&json!(1)));
        assert_eq!(got.get("b"), Some(&json!(20)));
        assert_eq!(got.get("c"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn scroll_pages_through_everything() {
        let store = MemoryStore::new(1);
        let points: Vec<Point> = (0..5).map(|i| point(i, vec![1.0], &[])).collect();
        store.upsert(points).await.expect("upsert");

        let mut seen = Vec::new();
        let mut offset = None;
        loop {
            let page = store.scroll(None, 2, offset).await.expect("scroll");
            seen.extend(page.points.iter().map(|(id, _)| *id));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn collection_info_samples_schema() {
        let store = MemoryStore::new(2);
        store
            .upsert(vec![point(
                1,
                vec![1.0, 0.0],
                &[
                    ("count", json!(3)),
                    ("tags", json!(["a"])),
                    ("title", json!("short")),
                ],
            )])
            .await
            .expect("upsert");

        let info = store.collection_info().await.expect("info");
        assert_eq!(info.points_count, 1);
        assert_eq!(info.dimensions, 2);
        assert_eq!(info.payload_fields.get("count"), Some(&json!("integer")));
        assert_eq!(info.payload_fields.get("tags"), Some(&json!("keyword-array")));
        assert_eq!(info.payload_fields.get("title"), Some(&json!("keyword")));
    }
}
