//! Configuration loading.
//!
//! A single JSON or YAML document (chosen by file extension) deserialized
//! into the resolved [`Config`] tree. Every string supports
//! `${VAR}` / `${VAR:default}` environment expansion, applied recursively
//! before deserialization and depth-bounded to break cycles. Configuration
//! errors abort startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::rules::{InferenceRule, NamedTransforms};

/// Expansion recursion bound; a `${A}` -> `${B}` -> `${A}` cycle stops here.
const MAX_EXPANSION_DEPTH: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub config_watch: ConfigWatchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub inference_rules: Vec<InferenceRule>,
    #[serde(default)]
    pub maps: NamedTransforms,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub ignored: Vec<String>,
    #[serde(default)]
    pub use_polling: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Only emit events after size+mtime have been quiet this long.
    #[serde(default)]
    pub stability_threshold_ms: Option<u64>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            ignored: Vec::new(),
            use_polling: false,
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            stability_threshold_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigWatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_config_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ConfigWatchConfig {
    fn default() -> Self {
        Self { enabled: true, debounce_ms: default_config_debounce_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// `"openai"` (any compatible `/v1/embeddings` endpoint) or `"hash"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_url")]
    pub api_base_url: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Usually injected via `${OPENAI_API_KEY}` expansion.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Token-bucket capacity for the event queue, events per minute.
    #[serde(default)]
    pub rate_limit_per_minute: Option<f64>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_base_url: default_embedding_url(),
            dimensions: default_dimensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            api_key: None,
            rate_limit_per_minute: None,
            concurrency: default_concurrency(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VectorStoreConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: default_vector_url(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load and resolve the config document at `path`.
pub fn load(path: &Path) -> Result<Config, AppError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {}: {e}", path.display())))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let mut tree: Value = if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse {}: {e}", path.display())))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse {}: {e}", path.display())))?
    };

    expand_tree(&mut tree);
    serde_json::from_value(tree)
        .map_err(|e| AppError::Config(format!("invalid config {}: {e}", path.display())))
}

/// Walk the document and expand every string in place.
fn expand_tree(value: &mut Value) {
    match value {
        Value::String(s) => *s = expand_str(s, MAX_EXPANSION_DEPTH),
        Value::Array(items) => items.iter_mut().for_each(expand_tree),
        Value::Object(map) => map.values_mut().for_each(expand_tree),
        _ => {}
    }
}

/// Expand `${VAR}` / `${VAR:default}` occurrences. The substituted text is
/// itself expanded while `depth` lasts; unset variables without a default
/// become the empty string.
fn expand_str(input: &str, depth: u32) -> String {
    if depth == 0 || !input.contains("${") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let spec = &after[..end];
                let (var, default) = match spec.split_once(':') {
                    Some((var, default)) => (var, Some(default)),
                    None => (spec, None),
                };
                let resolved = std::env::var(var)
                    .ok()
                    .or_else(|| default.map(str::to_string))
                    .unwrap_or_default();
                out.push_str(&expand_str(&resolved, depth - 1));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from(".jeeves-watcher")
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_config_debounce_ms() -> u64 {
    500
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_concurrency() -> usize {
    2
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_vector_provider() -> String {
    "qdrant".to_string()
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "jeeves".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7071
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn defaults_fill_everything() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, "jeeves.config.json", "{}");
        let config = load(&path).expect("load");

        assert_eq!(config.metadata_dir, PathBuf::from(".jeeves-watcher"));
        assert_eq!(config.shutdown_timeout_ms, 10_000);
        assert_eq!(config.embedding.chunk_size, 1000);
        assert_eq!(config.embedding.chunk_overlap, 200);
        assert_eq!(config.watch.debounce_ms, 500);
        assert!(config.config_watch.enabled);
        assert_eq!(config.api.port, 7071);
    }

    #[test]
    fn yaml_documents_load_by_extension() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            "jeeves.config.yaml",
            "watch:\n  paths:\n    - /w/docs\nembedding:\n  provider: hash\n  dimensions: 64\n",
        );
        let config = load(&path).expect("load");
        assert_eq!(config.watch.paths, vec!["/w/docs".to_string()]);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dimensions, 64);
    }

    #[test]
    fn env_expansion_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        // SAFETY: test-local variable; no concurrent reader depends on it.
        unsafe { std::env::set_var("JEEVES_TEST_COLLECTION", "from-env") };
        let path = write_config(
            &dir,
            "jeeves.config.json",
            r#"{"vectorStore": {"collection": "${JEEVES_TEST_COLLECTION}", "url": "${JEEVES_TEST_MISSING:http://fallback:6333}"}}"#,
        );
        let config = load(&path).expect("load");
        assert_eq!(config.vector_store.collection, "from-env");
        assert_eq!(config.vector_store.url, "http://fallback:6333");
    }

    #[test]
    fn missing_variable_without_default_is_empty() {
        assert_eq!(expand_str("x${JEEVES_TEST_NOT_SET_ANYWHERE}y", 10), "xy");
    }

    #[test]
    fn expansion_is_depth_bounded() {
        // SAFETY: test-local variables forming a deliberate cycle.
        unsafe {
            std::env::set_var("JEEVES_TEST_CYCLE_A", "${JEEVES_TEST_CYCLE_B}");
            std::env::set_var("JEEVES_TEST_CYCLE_B", "${JEEVES_TEST_CYCLE_A}");
        }
        // Terminates; the bound eats the cycle.
        let out = expand_str("${JEEVES_TEST_CYCLE_A}", 10);
        assert!(out.is_empty() || out.contains("JEEVES_TEST_CYCLE"));
    }

    #[test]
    fn unclosed_placeholder_is_literal() {
        assert_eq!(expand_str("plain ${unclosed", 10), "plain ${unclosed");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, "jeeves.config.json", r#"{"wacth": {}}"#);
        assert!(load(&path).is_err());
    }

    #[test]
    fn inference_rules_deserialize() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            "jeeves.config.json",
            r#"{
                "inferenceRules": [
                    {
                        "match": {"type": "object", "properties": {"path": {"glob": "**/meetings/**"}}},
                        "set": {"domain": "meetings"},
                        "transform": "meeting_date"
                    }
                ],
                "maps": {"meeting_date": {"date": "$.input.name"}}
            }"#,
        );
        let config = load(&path).expect("load");
        assert_eq!(config.inference_rules.len(), 1);
        assert!(config.maps.contains_key("meeting_date"));
    }
}
