//! Document processor: orchestrates the per-file indexing pipeline and the
//! three mutation modes (content, metadata-only, rules-only).
//!
//! Pipeline for a content change: extract → attributes → rule inference →
//! sidecar merge → content-hash skip → chunk → embed → upsert → orphan
//! cleanup. Per-file failures are logged and swallowed so one bad file never
//! stalls the queue; callers of the metadata/rules mutations get the error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::chunker;
use crate::embed::Embedder;
use crate::error::AppError;
use crate::extract;
use crate::identity::{content_hash, forward_slash, point_id};
use crate::rules::{FileAttributes, RuleSet};
use crate::sidecar;
use crate::vector::{Payload, Point, VectorStore, strip_reserved};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub metadata_dir: PathBuf,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            metadata_dir: PathBuf::from(".jeeves-watcher"),
        }
    }
}

pub struct Processor {
    cfg: ProcessorConfig,
    embedder: Arc<Embedder>,
    vector: Arc<VectorStore>,
    rules: ArcSwap<RuleSet>,
}

impl Processor {
    pub fn new(
        cfg: ProcessorConfig,
        embedder: Arc<Embedder>,
        vector: Arc<VectorStore>,
        rules: RuleSet,
    ) -> Self {
        Self { cfg, embedder, vector, rules: ArcSwap::from_pointee(rules) }
    }

    pub fn vector(&self) -> &Arc<VectorStore> {
        &self.vector
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.cfg.metadata_dir
    }

    /// Publish a new rule table. In-flight operations keep the snapshot they
    /// took at entry; subsequent operations see the new table.
    pub fn update_rules(&self, rules: RuleSet) {
        debug!(rules = rules.len(), "rule table swapped");
        self.rules.store(Arc::new(rules));
    }

    // ── Content pipeline ──────────────────────────────────────────────────────

    /// Index one file. Every failure is logged with the path and swallowed;
    /// the queue sees success either way.
    pub async fn process_file(&self, path: &Path) {
        if let Err(e) = self.process_file_inner(path).await {
            warn!(path = %path.display(), error = %e, "file processing failed");
        }
    }

    async fn process_file_inner(&self, path: &Path) -> Result<(), AppError> {
        let extracted = extract::extract(path)?;
        if extracted.text.trim().is_empty() {
            debug!(path = %path.display(), "no extractable text, skipping");
            return Ok(());
        }

        let file_path = forward_slash(&path.to_string_lossy());
        let metadata = self.merged_metadata(path, &file_path, &extracted)?;
        let hash = content_hash(&extracted.text);

        let probe = self.vector.get_payload(point_id(&file_path, Some(0))).await;
        if let Some(payload) = &probe {
            if payload.get("content_hash").and_then(Value::as_str) == Some(hash.as_str()) {
                debug!(path = %file_path, "content unchanged, skipping");
                return Ok(());
            }
        }
        let old_total = probed_total_chunks(probe.as_ref()).unwrap_or(0);

        let ext = extract::extension_of(path);
        let chunks = chunker::split(&ext, &extracted.text, self.cfg.chunk_size, self.cfg.chunk_overlap)?;
        let vectors = self.embedder.embed(&chunks).await?;
        let dimensions = self.embedder.dimensions();
        if vectors.len() != chunks.len() || vectors.iter().any(|v| v.len() != dimensions) {
            return Err(AppError::Embed(format!(
                "embedder returned wrong shape for {} chunks of {file_path}",
                chunks.len()
            )));
        }

        let total = chunks.len();
        let points: Vec<Point> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| {
                let mut payload = metadata.clone();
                payload.insert("file_path".to_string(), json!(file_path));
                payload.insert("chunk_index".to_string(), json!(i));
                payload.insert("total_chunks".to_string(), json!(total));
                payload.insert("content_hash".to_string(), json!(hash));
                payload.insert("chunk_text".to_string(), json!(chunk));
                Point { id: point_id(&file_path, Some(i)), vector, payload }
            })
            .collect();

        self.vector.upsert(points).await?;
        debug!(path = %file_path, chunks = total, "file indexed");

        if old_total > total {
            let orphans: Vec<_> = (total..old_total).map(|i| point_id(&file_path, Some(i))).collect();
            self.vector.delete(orphans).await?;
            debug!(path = %file_path, removed = old_total - total, "orphan chunks removed");
        }
        Ok(())
    }

    /// Remove every chunk of `path` from the store along with its sidecar.
    pub async fn delete_file(&self, path: &Path) {
        if let Err(e) = self.delete_file_inner(path).await {
            warn!(path = %path.display(), error = %e, "file deletion failed");
        }
    }

    async fn delete_file_inner(&self, path: &Path) -> Result<(), AppError> {
        let file_path = forward_slash(&path.to_string_lossy());
        let probe = self.vector.get_payload(point_id(&file_path, Some(0))).await;
        // Default 1 so single-chunk files are cleaned even without a probe.
        let total = probed_total_chunks(probe.as_ref()).unwrap_or(1).max(1);

        let ids: Vec<_> = (0..total).map(|i| point_id(&file_path, Some(i))).collect();
        self.vector.delete(ids).await?;
        sidecar::delete(&file_path, &self.cfg.metadata_dir)?;
        debug!(path = %file_path, chunks = total, "file removed from index");
        Ok(())
    }

    // ── Metadata-only mutation ────────────────────────────────────────────────

    /// Merge `partial` into the sidecar (caller wins) and push the merged
    /// enrichment onto every stored chunk. Returns `None` when the file has
    /// no indexed points yet; the sidecar is still written.
    pub async fn process_metadata_update(
        &self,
        path: &str,
        partial: Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, AppError> {
        let file_path = forward_slash(path);
        let mut merged = sidecar::read(&file_path, &self.cfg.metadata_dir).unwrap_or_default();
        merged.extend(partial);
        strip_reserved(&mut merged);
        sidecar::write(&file_path, &self.cfg.metadata_dir, &merged)?;

        let probe = self.vector.get_payload(point_id(&file_path, Some(0))).await;
        let Some(total) = probed_total_chunks(probe.as_ref()) else {
            debug!(path = %file_path, "metadata stored, no indexed points to annotate");
            return Ok(None);
        };

        let ids: Vec<_> = (0..total).map(|i| point_id(&file_path, Some(i))).collect();
        self.vector.set_payload(ids, merged.clone()).await?;
        Ok(Some(merged))
    }

    // ── Rules-only mutation ───────────────────────────────────────────────────

    /// Re-run inference and sidecar merge for an already-indexed file and
    /// rewrite chunk payloads without re-embedding. Skips files with no
    /// indexed points.
    pub async fn process_rules_update(
        &self,
        path: &Path,
    ) -> Result<Option<Map<String, Value>>, AppError> {
        let file_path = forward_slash(&path.to_string_lossy());
        let probe = self.vector.get_payload(point_id(&file_path, Some(0))).await;
        let Some(total) = probed_total_chunks(probe.as_ref()) else {
            return Ok(None);
        };

        let extracted = extract::extract(path)?;
        let metadata = self.merged_metadata(path, &file_path, &extracted)?;

        let ids: Vec<_> = (0..total).map(|i| point_id(&file_path, Some(i))).collect();
        self.vector.set_payload(ids, metadata.clone()).await?;
        Ok(Some(metadata))
    }

    // ── Store maintenance ─────────────────────────────────────────────────────

    /// For every point in the store, strip the reserved system keys from its
    /// payload and rewrite the corresponding sidecar file. Returns the number
    /// of files rewritten.
    pub async fn rebuild_metadata(&self) -> Result<usize, AppError> {
        let mut rewritten = std::collections::HashSet::new();
        let mut offset = None;
        loop {
            let page = self.vector.scroll(None, 100, offset).await?;
            for (_, mut payload) in page.points {
                let Some(file_path) = payload.get("file_path").and_then(Value::as_str).map(str::to_string)
                else {
                    continue;
                };
                if !rewritten.insert(file_path.clone()) {
                    continue;
                }
                strip_reserved(&mut payload);
                sidecar::write(&file_path, &self.cfg.metadata_dir, &payload)?;
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(rewritten.len())
    }

    // ── Shared steps ──────────────────────────────────────────────────────────

    /// Steps 2–3 of the content pipeline: attributes, rule inference, and the
    /// sidecar overlay (enrichment wins).
    fn merged_metadata(
        &self,
        path: &Path,
        file_path: &str,
        extracted: &extract::ExtractedText,
    ) -> Result<Map<String, Value>, AppError> {
        let attrs = FileAttributes::from_path(path, extracted)?;
        let rules = self.rules.load();
        let mut metadata = rules.evaluate(&attrs);
        if let Some(enrichment) = sidecar::read(file_path, &self.cfg.metadata_dir) {
            metadata.extend(enrichment);
        }
        Ok(metadata)
    }
}

/// `total_chunks` from a probed base payload; `None` when there is no
/// payload. A present payload without the field counts as one chunk.
fn probed_total_chunks(probe: Option<&Payload>) -> Option<usize> {
    let payload = probe?;
    Some(
        payload
            .get("total_chunks")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probed_total_defaults_to_one_chunk() {
        assert_eq!(probed_total_chunks(None), None);

        let empty = Payload::new();
        assert_eq!(probed_total_chunks(Some(&empty)), Some(1));

        let mut with_total = Payload::new();
        with_total.insert("total_chunks".to_string(), json!(5));
        assert_eq!(probed_total_chunks(Some(&with_total)), Some(5));
    }
}
