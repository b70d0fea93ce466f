//! Gitignore-scoped path filter.
//!
//! Built from the watch roots: each root is traced up to its enclosing git
//! repository, every `.gitignore` below that repository is parsed, and
//! `is_ignored` consults the entries deepest-first. Paths outside any known
//! repository are never ignored by this filter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// Directories never descended into while discovering `.gitignore` files.
const SKIP_DIRS: [&str; 2] = [".git", "node_modules"];

struct IgnoreEntry {
    /// Directory the `.gitignore` file lives in.
    dir: PathBuf,
    matcher: Gitignore,
}

struct RepoEntry {
    root: PathBuf,
    /// Sorted deepest-first so nested files take precedence.
    entries: Vec<IgnoreEntry>,
}

pub struct GitignoreFilter {
    repos: RwLock<Vec<RepoEntry>>,
}

impl GitignoreFilter {
    /// Discover the repositories enclosing `watch_roots` and parse every
    /// `.gitignore` they contain.
    pub fn new(watch_roots: &[PathBuf]) -> Self {
        let mut repos: Vec<RepoEntry> = Vec::new();
        for root in watch_roots {
            let Some(repo_root) = find_repo_root(root) else {
                continue;
            };
            if repos.iter().any(|r| r.root == repo_root) {
                continue;
            }
            debug!(repo = %repo_root.display(), "gitignore filter: repo discovered");
            repos.push(load_repo(repo_root));
        }
        Self { repos: RwLock::new(repos) }
    }

    /// `true` when a `.gitignore` entry in an enclosing repository ignores
    /// `path`. A negation match (`!pattern`) in a deeper file settles the
    /// answer as not-ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let is_dir = path.is_dir();
        let repos = self.repos.read().unwrap_or_else(|e| e.into_inner());

        for repo in repos.iter().filter(|r| path.starts_with(&r.root)) {
            for entry in &repo.entries {
                let Ok(rel) = path.strip_prefix(&entry.dir) else {
                    continue;
                };
                match entry.matcher.matched(rel, is_dir) {
                    Match::Ignore(_) => return true,
                    Match::Whitelist(_) => return false,
                    Match::None => {}
                }
            }
        }
        false
    }

    /// Reload a single `.gitignore` after it changed on disk: the old entry
    /// is dropped, the file is reparsed when it still exists, and a
    /// previously unknown repository is adopted wholesale.
    pub fn invalidate(&self, ignore_file: &Path) {
        let Some(dir) = ignore_file.parent().map(Path::to_path_buf) else {
            return;
        };

        let mut repos = self.repos.write().unwrap_or_else(|e| e.into_inner());
        let Some(repo) = repos.iter_mut().find(|r| dir.starts_with(&r.root)) else {
            drop(repos);
            if let Some(repo_root) = find_repo_root(&dir) {
                debug!(repo = %repo_root.display(), "gitignore filter: adopting new repo");
                let mut repos = self.repos.write().unwrap_or_else(|e| e.into_inner());
                if !repos.iter().any(|r| r.root == repo_root) {
                    repos.push(load_repo(repo_root));
                }
            }
            return;
        };

        repo.entries.retain(|e| e.dir != dir);
        if ignore_file.is_file() {
            if let Some(entry) = parse_ignore_file(&dir, ignore_file) {
                repo.entries.push(entry);
                sort_deepest_first(&mut repo.entries);
            }
        }
    }
}

/// Nearest ancestor of `start` (inclusive) containing a `.git` directory.
fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").is_dir() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

fn load_repo(root: PathBuf) -> RepoEntry {
    let mut entries = Vec::new();
    collect_ignore_files(&root, &mut entries);
    sort_deepest_first(&mut entries);
    RepoEntry { root, entries }
}

fn collect_ignore_files(dir: &Path, out: &mut Vec<IgnoreEntry>) {
    let ignore_file = dir.join(".gitignore");
    if ignore_file.is_file() {
        if let Some(entry) = parse_ignore_file(dir, &ignore_file) {
            out.push(entry);
        }
    }

    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for child in read_dir.flatten() {
        let path = child.path();
        if !path.is_dir() {
            continue;
        }
        let skip = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| SKIP_DIRS.contains(&n));
        if !skip {
            collect_ignore_files(&path, out);
        }
    }
}

fn parse_ignore_file(dir: &Path, file: &Path) -> Option<IgnoreEntry> {
    let mut builder = GitignoreBuilder::new(dir);
    if let Some(e) = builder.add(file) {
        warn!(file = %file.display(), error = %e, "skipping unparseable .gitignore");
        return None;
    }
    match builder.build() {
        Ok(matcher) => Some(IgnoreEntry { dir: dir.to_path_buf(), matcher }),
        Err(e) => {
            warn!(file = %file.display(), error = %e, "skipping unparseable .gitignore");
            None
        }
    }
}

fn sort_deepest_first(entries: &mut [IgnoreEntry]) {
    entries.sort_by(|a, b| b.dir.as_os_str().len().cmp(&a.dir.as_os_str().len()));
}
