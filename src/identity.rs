//! Deterministic identity scheme: point IDs, content hashes, sidecar names.
//!
//! Pure functions, no I/O. Point IDs and sidecar filenames are part of the
//! on-disk compatibility contract: the same path always maps to the same
//! stored identifiers regardless of input casing or separator style.

use std::path::Path;

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// v5 UUID namespace for point identities. Changing this value orphans every
/// previously stored point and forces a full reindex.
pub const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x8f1d_b2a4_6c53_4e0b_9a77_d41e_25c0_93f6);

/// Lowercase hex SHA-256 of the UTF-8 bytes of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert backslash separators to forward slashes without touching anything else.
pub fn forward_slash(path: &str) -> String {
    path.replace('\\', "/")
}

/// Deterministic point identity for a file path and optional chunk index.
///
/// The key is `lowercase(forward_slash(path))`, with `#<index>` appended when
/// a chunk index is given. Chunks of one file form a contiguous range
/// `[0, total_chunks)` over this function.
pub fn point_id(path: &str, chunk_index: Option<usize>) -> Uuid {
    let base = forward_slash(path).to_lowercase();
    let key = match chunk_index {
        Some(i) => format!("{base}#{i}"),
        None => base,
    };
    Uuid::new_v5(&POINT_NAMESPACE, key.as_bytes())
}

/// Normalize a path for sidecar addressing: lowercase, forward slashes, and
/// the `:` dropped after a leading single-letter drive prefix.
fn normalize_for_sidecar(path: &str) -> String {
    let mut s = forward_slash(path).to_lowercase();
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && bytes[0].is_ascii_lowercase()
        && bytes[1] == b':'
        && bytes.get(2).is_none_or(|b| *b == b'/')
    {
        s.remove(1);
    }
    s
}

/// File name of the enrichment sidecar for `path`:
/// `<hex-sha256(normalized-path)>.meta.json`.
pub fn sidecar_file_name(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_sidecar(path).as_bytes());
    format!("{}.meta.json", hex::encode(hasher.finalize()))
}

/// Full on-disk location of the sidecar for `path` under the metadata directory.
pub fn sidecar_path(path: &str, dir: &Path) -> std::path::PathBuf {
    dir.join(sidecar_file_name(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_64_hex_chars() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Stable across calls.
        assert_eq!(h, content_hash("hello"));
    }

    #[test]
    fn point_id_ignores_case_and_separator() {
        let a = point_id("/W/Docs/Readme.MD", Some(0));
        let b = point_id("\\w\\docs\\readme.md", Some(0));
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_distinguishes_chunks() {
        let base = point_id("/w/a.txt", None);
        let c0 = point_id("/w/a.txt", Some(0));
        let c1 = point_id("/w/a.txt", Some(1));
        assert_ne!(base, c0);
        assert_ne!(c0, c1);
    }

    #[test]
    fn sidecar_name_shape() {
        let name = sidecar_file_name("/w/a.txt");
        assert!(name.ends_with(".meta.json"));
        assert_eq!(name.len(), 64 + ".meta.json".len());
    }

    #[test]
    fn sidecar_name_drops_drive_colon() {
        // `C:\Users\x.md` and `c/users/x.md` address the same sidecar.
        assert_eq!(sidecar_file_name("C:\\Users\\x.md"), sidecar_file_name("c/users/x.md"));
        // But a colon later in the path is preserved.
        assert_ne!(sidecar_file_name("/a/b:c.md"), sidecar_file_name("/a/bc.md"));
    }

    #[test]
    fn sidecar_path_joins_dir() {
        let p = sidecar_path("/w/a.txt", Path::new("/meta"));
        assert!(p.starts_with("/meta"));
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), sidecar_file_name("/w/a.txt"));
    }
}
