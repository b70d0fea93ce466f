//! HTTP surface: thin axum handlers over the processor and vector store.
//!
//! Routes follow the service contract: `/status`, `/search`, `/metadata`,
//! `/reindex`, `/config-reindex`, `/rebuild-metadata`. Handlers deserialize,
//! call one processor or store method, and serialize; unexpected failures
//! map to `500 {"error":"Internal server error"}` and unknown reindex
//! scopes to `501`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::gitignore::GitignoreFilter;
use crate::processor::Processor;
use crate::scan;

pub struct ApiState {
    pub processor: Arc<Processor>,
    pub gitignore: Arc<GitignoreFilter>,
    pub collection: String,
    pub watch_patterns: Vec<String>,
    pub ignored: Vec<glob::Pattern>,
    pub started_at: Instant,
}

pub struct ApiServer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Bind `host:port` and serve until stopped.
    pub async fn start(host: &str, port: u16, state: Arc<ApiState>) -> Result<Self, AppError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| AppError::Http(format!("bind {host}:{port}: {e}")))?;
        info!(%host, port, "http api listening");

        let router = router(state);
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "http server exited with error");
            }
        });

        Ok(Self { cancel, task })
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// The service's route table; factored out so tests can drive it without a
/// listener.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/search", post(search))
        .route("/metadata", post(metadata))
        .route("/reindex", post(reindex))
        .route("/config-reindex", post(config_reindex))
        .route("/rebuild-metadata", post(rebuild_metadata))
        .with_state(state)
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct MetadataRequest {
    path: String,
    metadata: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct ConfigReindexRequest {
    scope: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn internal_error(context: &str, e: &AppError) -> Response {
    error!(context, error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /status
async fn status(State(state): State<Arc<ApiState>>) -> Response {
    let info = match state.processor.vector().collection_info().await {
        Ok(info) => info,
        Err(e) => return internal_error("status", &e),
    };
    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "collection": {
            "name": state.collection,
            "pointCount": info.points_count,
            "dimensions": info.dimensions,
        },
        "payloadFields": info.payload_fields,
    }))
    .into_response()
}

/// POST /search
async fn search(State(state): State<Arc<ApiState>>, Json(req): Json<SearchRequest>) -> Response {
    let limit = req.limit.unwrap_or(10);
    let vectors = match state.processor.embedder().embed(&[req.query.clone()]).await {
        Ok(v) => v,
        Err(e) => return internal_error("search", &e),
    };
    let Some(query_vector) = vectors.into_iter().next() else {
        return internal_error("search", &AppError::Embed("empty embedding batch".into()));
    };

    match state.processor.vector().search(query_vector, limit, req.filter).await {
        Ok(hits) => Json(hits).into_response(),
        Err(e) => internal_error("search", &e),
    }
}

/// POST /metadata
async fn metadata(State(state): State<Arc<ApiState>>, Json(req): Json<MetadataRequest>) -> Response {
    match state.processor.process_metadata_update(&req.path, req.metadata).await {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(e) => internal_error("metadata", &e),
    }
}

/// POST /reindex
///
/// Walks the watch globs and processes files sequentially, one at a time,
/// to keep the load predictable. Responds after the rescan finishes.
async fn reindex(State(state): State<Arc<ApiState>>) -> Response {
    let files = scan::discover_files(&state.watch_patterns, &state.ignored, &state.gitignore);
    let count = files.len();
    info!(files = count, "reindex started");

    for path in files {
        state.processor.process_file(&path).await;
    }

    Json(json!({ "ok": true, "filesIndexed": count })).into_response()
}

/// POST /config-reindex
///
/// `scope=rules` (default) re-applies inference to already-indexed files;
/// `scope=full` re-runs the whole pipeline. Runs asynchronously; unchanged
/// content still short-circuits on its hash in full scope.
async fn config_reindex(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<ConfigReindexRequest>>,
) -> Response {
    let scope = body
        .map(|Json(req)| req.scope.unwrap_or_else(|| "rules".to_string()))
        .unwrap_or_else(|| "rules".to_string());

    let full = match scope.as_str() {
        "rules" => false,
        "full" => true,
        other => {
            return (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({ "error": format!("unknown scope: {other}") })),
            )
                .into_response();
        }
    };

    let state = Arc::clone(&state);
    let scope_label = scope.clone();
    tokio::spawn(async move {
        let files = scan::discover_files(&state.watch_patterns, &state.ignored, &state.gitignore);
        info!(files = files.len(), scope = %scope_label, "config reindex started");
        for path in files {
            if full {
                state.processor.process_file(&path).await;
            } else if let Err(e) = state.processor.process_rules_update(&path).await {
                warn!(path = %path.display(), error = %e, "rules reindex failed for file");
            }
        }
        info!(scope = %scope_label, "config reindex finished");
    });

    Json(json!({ "status": "started", "scope": scope })).into_response()
}

/// POST /rebuild-metadata
async fn rebuild_metadata(State(state): State<Arc<ApiState>>) -> Response {
    match state.processor.rebuild_metadata().await {
        Ok(files) => {
            info!(files, "sidecar metadata rebuilt");
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => internal_error("rebuild-metadata", &e),
    }
}
