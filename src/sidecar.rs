//! Metadata sidecar store.
//!
//! Persists per-file enrichment JSON under a content-addressed filename in
//! the metadata directory (see [`crate::identity::sidecar_file_name`]).
//! No locking: callers serialize per-path through the event queue, and
//! concurrent external writers are unsupported.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AppError;
use crate::identity::sidecar_path;

/// Read the enrichment mapping for `path`, or `None` when the sidecar is
/// missing or unreadable. Any read or parse failure is treated as "no
/// sidecar"; callers treat that as an empty mapping.
pub fn read(path: &str, dir: &Path) -> Option<Map<String, Value>> {
    let file = sidecar_path(path, dir);
    let raw = fs::read_to_string(&file).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            debug!(file = %file.display(), "sidecar unreadable, treating as absent");
            None
        }
    }
}

/// Create or overwrite the sidecar for `path` with `mapping`.
///
/// Parent directories are created as needed. The body is pretty-printed
/// JSON with a trailing newline.
pub fn write(path: &str, dir: &Path, mapping: &Map<String, Value>) -> Result<(), AppError> {
    let file = sidecar_path(path, dir);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Sidecar(format!("create {}: {e}", parent.display())))?;
    }
    let mut body = serde_json::to_string_pretty(&Value::Object(mapping.clone()))
        .map_err(|e| AppError::Sidecar(format!("serialize sidecar for {path}: {e}")))?;
    body.push('\n');
    fs::write(&file, body)
        .map_err(|e| AppError::Sidecar(format!("write {}: {e}", file.display())))?;
    Ok(())
}

/// Remove the sidecar for `path`. Not-found is success.
pub fn delete(path: &str, dir: &Path) -> Result<(), AppError> {
    let file = sidecar_path(path, dir);
    match fs::remove_file(&file) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Sidecar(format!("remove {}: {e}", file.display()))),
    }
}
