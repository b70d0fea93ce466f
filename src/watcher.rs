//! Filesystem watcher: maps raw filesystem events to queue entries wrapped
//! in health tracking.
//!
//! A notify watcher (or a polling watcher when configured) observes the
//! directory roots implied by the watch globs. Each create/modify/delete on
//! a matching, non-ignored file becomes a normal-priority queue entry whose
//! handler runs the processor behind the health supervisor's backoff.
//! Watcher-level errors are recorded as failures; the failure threshold
//! stops the watch loop. `.gitignore` edits invalidate the path filter
//! instead of being indexed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::gitignore::GitignoreFilter;
use crate::health::HealthMonitor;
use crate::processor::Processor;
use crate::queue::{EventHandler, EventKind, EventQueue, FileEvent, Priority};
use crate::scan;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub patterns: Vec<String>,
    pub ignored: Vec<String>,
    pub use_polling: bool,
    pub poll_interval: Duration,
    /// When set, only emit an event after size and mtime have been stable
    /// for this window.
    pub stability_threshold: Option<Duration>,
}

pub struct FsWatcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FsWatcher {
    /// Register the watch roots and start the event loop. `cancel` is shared
    /// with the caller so the health supervisor's fatal callback can stop
    /// the watcher.
    pub fn start(
        opts: WatchOptions,
        queue: Arc<EventQueue>,
        processor: Arc<Processor>,
        health: Arc<HealthMonitor>,
        gitignore: Arc<GitignoreFilter>,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

        let mut watcher = build_watcher(&opts, tx)?;
        for root in scan::watch_roots(&opts.patterns) {
            match watcher.watch(&root, RecursiveMode::Recursive) {
                Ok(()) => info!(root = %root.display(), "watching"),
                Err(e) => warn!(root = %root.display(), error = %e, "failed to watch root"),
            }
        }

        let ignored = compile_ignored(&opts.ignored);
        let task = tokio::spawn(event_loop(
            watcher,
            rx,
            opts,
            ignored,
            queue,
            processor,
            health,
            gitignore,
            cancel.clone(),
        ));

        Ok(Self { cancel, task })
    }

    /// Stop the event loop and drop the underlying watcher.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

enum AnyWatcher {
    Recommended(RecommendedWatcher),
    Poll(PollWatcher),
}

impl AnyWatcher {
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            Self::Recommended(w) => w.watch(path, mode),
            Self::Poll(w) => w.watch(path, mode),
        }
    }
}

fn build_watcher(
    opts: &WatchOptions,
    tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
) -> Result<AnyWatcher, AppError> {
    let handler = move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    };

    if opts.use_polling {
        let config = notify::Config::default().with_poll_interval(opts.poll_interval);
        let watcher = PollWatcher::new(handler, config)
            .map_err(|e| AppError::Watch(format!("create poll watcher: {e}")))?;
        Ok(AnyWatcher::Poll(watcher))
    } else {
        let watcher = RecommendedWatcher::new(handler, notify::Config::default())
            .map_err(|e| AppError::Watch(format!("create watcher: {e}")))?;
        Ok(AnyWatcher::Recommended(watcher))
    }
}

fn compile_ignored(patterns: &[String]) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                warn!(pattern = %p, error = %e, "invalid ignore pattern, skipping");
                None
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    _watcher: AnyWatcher,
    mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    opts: WatchOptions,
    ignored: Vec<glob::Pattern>,
    queue: Arc<EventQueue>,
    processor: Arc<Processor>,
    health: Arc<HealthMonitor>,
    gitignore: Arc<GitignoreFilter>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("watcher shutting down");
                break;
            }

            received = rx.recv() => {
                match received {
                    Some(Ok(event)) => {
                        handle_event(
                            event, &opts, &ignored, &queue, &processor, &health,
                            &gitignore, &cancel,
                        );
                    }
                    Some(Err(e)) => {
                        let err = AppError::Watch(format!("watch backend error: {e}"));
                        if !health.record_failure(&err) {
                            warn!("watcher stopped by health supervisor");
                            cancel.cancel();
                            break;
                        }
                    }
                    None => {
                        info!("watch channel closed, watcher exiting");
                        break;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_event(
    event: notify::Event,
    opts: &WatchOptions,
    ignored: &[glob::Pattern],
    queue: &Arc<EventQueue>,
    processor: &Arc<Processor>,
    health: &Arc<HealthMonitor>,
    gitignore: &Arc<GitignoreFilter>,
    cancel: &CancellationToken,
) {
    let kind = match event.kind {
        notify::EventKind::Create(_) => EventKind::Create,
        notify::EventKind::Modify(_) => EventKind::Modify,
        notify::EventKind::Remove(_) => EventKind::Delete,
        _ => return,
    };

    for path in event.paths {
        if path.file_name().and_then(|n| n.to_str()) == Some(".gitignore") {
            debug!(path = %path.display(), "gitignore changed, invalidating filter");
            gitignore.invalidate(&path);
            continue;
        }

        // Existence decides create/modify vs delete; rename arrivals come
        // through as creates, departures as deletes.
        let kind = if kind != EventKind::Delete && !path.exists() {
            EventKind::Delete
        } else {
            kind
        };

        if kind != EventKind::Delete && path.is_dir() {
            continue;
        }
        if !scan::matches_patterns(&path, &opts.patterns) {
            continue;
        }
        if scan::is_excluded(&path, ignored, gitignore) {
            debug!(path = %path.display(), "ignored path, skipping");
            continue;
        }

        let file_event = FileEvent { kind, path: path.clone(), priority: Priority::Normal };
        let handler = pipeline_handler(Arc::clone(processor), Arc::clone(health), cancel.clone());

        match (kind, opts.stability_threshold) {
            (EventKind::Delete, _) | (_, None) => queue.enqueue(file_event, handler),
            (_, Some(threshold)) => {
                let queue = Arc::clone(queue);
                let poll = opts.poll_interval;
                tokio::spawn(async move {
                    if wait_for_stability(&path, threshold, poll).await {
                        queue.enqueue(file_event, handler);
                    }
                });
            }
        }
    }
}

/// Queue handler for one file event: backoff, run the pipeline, record the
/// outcome with the health supervisor.
fn pipeline_handler(
    processor: Arc<Processor>,
    health: Arc<HealthMonitor>,
    cancel: CancellationToken,
) -> EventHandler {
    Box::new(move |event: FileEvent| {
        Box::pin(async move {
            health.backoff(&cancel).await;
            if cancel.is_cancelled() {
                return Ok(());
            }
            match event.kind {
                EventKind::Delete => processor.delete_file(&event.path).await,
                EventKind::Create | EventKind::Modify => processor.process_file(&event.path).await,
            }
            health.record_success();
            Ok(())
        })
    })
}

/// Wait until `path`'s size and mtime stop changing for `threshold`.
/// Returns `false` when the file disappears mid-wait; the delete event
/// handles cleanup.
async fn wait_for_stability(path: &Path, threshold: Duration, poll: Duration) -> bool {
    let poll = poll.max(Duration::from_millis(100));
    let mut last = match stat_signature(path) {
        Some(sig) => sig,
        None => return false,
    };
    let mut stable_since = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(poll).await;
        let Some(current) = stat_signature(path) else {
            return false;
        };
        if current != last {
            last = current;
            stable_since = tokio::time::Instant::now();
            continue;
        }
        if stable_since.elapsed() >= threshold {
            return true;
        }
    }
}

fn stat_signature(path: &Path) -> Option<(u64, std::time::SystemTime)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stability_wait_returns_false_for_missing_file() {
        assert!(!wait_for_stability(Path::new("/no/such/file"), Duration::from_millis(200), Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn stability_wait_settles_on_quiet_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "stable").expect("write");

        assert!(
            wait_for_stability(&file, Duration::from_millis(150), Duration::from_millis(50)).await
        );
    }

    #[test]
    fn invalid_ignore_patterns_are_dropped() {
        let compiled = compile_ignored(&["*.log".to_string(), "[broken".to_string()]);
        assert_eq!(compiled.len(), 1);
    }
}
