//! Corpus discovery: expand the watch globs into concrete files.
//!
//! Used by the startup scan and the reindex endpoints. Glob patterns
//! resolve through the filesystem; plain directory entries are walked
//! recursively. Results are filtered by the ignore globs and the
//! gitignore filter, deduplicated, and sorted.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::gitignore::GitignoreFilter;

/// Subtrees never worth scanning.
const SKIP_DIRS: [&str; 2] = [".git", "node_modules"];

pub fn discover_files(
    patterns: &[String],
    ignored: &[glob::Pattern],
    filter: &GitignoreFilter,
) -> Vec<PathBuf> {
    let mut files = BTreeSet::new();

    for pattern in patterns {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid watch pattern, skipping");
                continue;
            }
        };
        for entry in entries.flatten() {
            if entry.is_dir() {
                walk(&entry, &mut files);
            } else if entry.is_file() {
                files.insert(entry);
            }
        }
    }

    files
        .into_iter()
        .filter(|p| !is_excluded(p, ignored, filter))
        .collect()
}

/// The directory roots implied by the watch patterns: each pattern's literal
/// prefix before the first wildcard component. These are what the
/// filesystem watcher registers recursively.
pub fn watch_roots(patterns: &[String]) -> Vec<PathBuf> {
    let mut roots = BTreeSet::new();
    for pattern in patterns {
        let mut root = PathBuf::new();
        for component in Path::new(pattern).components() {
            let text = component.as_os_str().to_string_lossy();
            if text.contains(['*', '?', '[', '{']) {
                break;
            }
            root.push(component);
        }
        if root.as_os_str().is_empty() {
            root.push(".");
        }
        roots.insert(root);
    }
    // Drop roots nested under another root; watching the ancestor covers them.
    let all: Vec<PathBuf> = roots.into_iter().collect();
    all.iter()
        .filter(|r| !all.iter().any(|other| **r != *other && r.starts_with(other)))
        .cloned()
        .collect()
}

/// `true` when `path` belongs to the watched corpus: it matches one of the
/// watch patterns, or lives under a pattern's literal directory.
pub fn matches_patterns(path: &Path, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Ok(compiled) = glob::Pattern::new(pattern) {
            if compiled.matches_path_with(path, GLOB_OPTIONS) {
                return true;
            }
        }
        // A plain directory pattern covers everything beneath it.
        !pattern.contains(['*', '?', '[', '{']) && path.starts_with(pattern)
    })
}

pub fn is_excluded(path: &Path, ignored: &[glob::Pattern], filter: &GitignoreFilter) -> bool {
    if ignored.iter().any(|p| p.matches_path_with(path, GLOB_OPTIONS)) {
        return true;
    }
    filter.is_ignored(path)
}

const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn walk(dir: &Path, out: &mut BTreeSet<PathBuf>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for child in read_dir.flatten() {
        let path = child.path();
        if path.is_dir() {
            let skip = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| SKIP_DIRS.contains(&n));
            if !skip {
                walk(&path, out);
            }
        } else if path.is_file() {
            out.insert(path);
        }
    }
}
