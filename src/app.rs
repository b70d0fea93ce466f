//! Application wiring: construct every component, start the lifecycle,
//! drain on shutdown.
//!
//! Startup order: embedder → vector client → collection → rules →
//! processor → queue → watcher → HTTP → config watcher, then a low-priority
//! scan of the existing corpus so a cold store converges without a manual
//! reindex. Shutdown reverses it: stop the config watcher, stop the
//! filesystem watcher, drain the queue under the configured timeout, stop
//! HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiServer, ApiState};
use crate::config::Config;
use crate::embed::{Embedder, HashEmbedder, OpenAiEmbedder};
use crate::error::AppError;
use crate::gitignore::GitignoreFilter;
use crate::health::{HealthConfig, HealthMonitor};
use crate::processor::{Processor, ProcessorConfig};
use crate::queue::{EventHandler, EventKind, EventQueue, FileEvent, Priority, QueueConfig};
use crate::rules::RuleSet;
use crate::scan;
use crate::vector::{MemoryStore, QdrantStore, VectorStore};
use crate::watcher::{FsWatcher, WatchOptions};

pub struct App {
    queue: Arc<EventQueue>,
    watcher: FsWatcher,
    api: ApiServer,
    config_watcher: Option<ConfigWatcher>,
    shutdown_timeout: Duration,
}

impl App {
    pub async fn start(config: Config, config_path: PathBuf) -> Result<Self, AppError> {
        let embedder = Arc::new(build_embedder(&config)?);
        let vector = Arc::new(build_vector(&config, embedder.dimensions())?);
        vector.ensure_collection().await?;

        let rules = RuleSet::compile(config.inference_rules.clone(), config.maps.clone())?;
        info!(rules = rules.len(), "inference rules compiled");

        let processor = Arc::new(Processor::new(
            ProcessorConfig {
                chunk_size: config.embedding.chunk_size,
                chunk_overlap: config.embedding.chunk_overlap,
                metadata_dir: config.metadata_dir.clone(),
            },
            Arc::clone(&embedder),
            Arc::clone(&vector),
            rules,
        ));

        let queue = Arc::new(EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(config.watch.debounce_ms),
            concurrency: config.embedding.concurrency,
            rate_per_minute: config.embedding.rate_limit_per_minute,
        }));

        let gitignore = Arc::new(GitignoreFilter::new(&scan::watch_roots(&config.watch.paths)));

        let watch_cancel = CancellationToken::new();
        let fatal_cancel = watch_cancel.clone();
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()).with_fatal(Box::new(
            move |e| {
                error!(error = %e, "fatal watcher failure, stopping watch loop");
                fatal_cancel.cancel();
            },
        )));

        let api_state = Arc::new(ApiState {
            processor: Arc::clone(&processor),
            gitignore: Arc::clone(&gitignore),
            collection: config.vector_store.collection.clone(),
            watch_patterns: config.watch.paths.clone(),
            ignored: config
                .watch
                .ignored
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect(),
            started_at: Instant::now(),
        });
        let api = ApiServer::start(&config.api.host, config.api.port, api_state).await?;

        let watcher = FsWatcher::start(
            WatchOptions {
                patterns: config.watch.paths.clone(),
                ignored: config.watch.ignored.clone(),
                use_polling: config.watch.use_polling,
                poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
                stability_threshold: config.watch.stability_threshold_ms.map(Duration::from_millis),
            },
            Arc::clone(&queue),
            Arc::clone(&processor),
            Arc::clone(&health),
            Arc::clone(&gitignore),
            watch_cancel,
        )?;

        queue.start();
        enqueue_initial_scan(&config, &queue, &processor, &gitignore);

        let config_watcher = if config.config_watch.enabled {
            match ConfigWatcher::start(
                config_path,
                Duration::from_millis(config.config_watch.debounce_ms),
                Arc::clone(&processor),
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "config watcher unavailable, hot reload disabled");
                    None
                }
            }
        } else {
            None
        };

        info!("jeeves-watcher started");
        Ok(Self {
            queue,
            watcher,
            api,
            config_watcher,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        })
    }

    pub async fn stop(self) {
        info!("shutting down");
        if let Some(config_watcher) = self.config_watcher {
            config_watcher.stop().await;
        }
        self.watcher.stop().await;

        if tokio::time::timeout(self.shutdown_timeout, self.queue.drain())
            .await
            .is_err()
        {
            warn!(timeout_ms = self.shutdown_timeout.as_millis() as u64, "drain timed out, abandoning pending work");
        }
        self.queue.stop();
        self.api.stop().await;
        info!("shutdown complete");
    }
}

/// Env expansion leaves `""` behind for unset variables; treat that as no key.
fn nonempty(key: &Option<String>) -> Option<String> {
    key.as_deref().filter(|k| !k.is_empty()).map(str::to_string)
}

fn build_embedder(config: &Config) -> Result<Embedder, AppError> {
    let e = &config.embedding;
    match e.provider.as_str() {
        "openai" => Ok(Embedder::OpenAi(OpenAiEmbedder::new(
            e.api_base_url.clone(),
            e.model.clone(),
            e.dimensions,
            e.timeout_seconds,
            nonempty(&e.api_key),
        )?)),
        "hash" => Ok(Embedder::Hash(HashEmbedder::new(e.dimensions))),
        other => Err(AppError::Config(format!("unknown embedding provider: {other}"))),
    }
}

fn build_vector(config: &Config, dimensions: usize) -> Result<VectorStore, AppError> {
    let v = &config.vector_store;
    match v.provider.as_str() {
        "qdrant" => Ok(VectorStore::Qdrant(QdrantStore::new(
            v.url.clone(),
            v.collection.clone(),
            nonempty(&v.api_key),
            dimensions,
        )?)),
        "memory" => Ok(VectorStore::Memory(MemoryStore::new(dimensions))),
        other => Err(AppError::Config(format!("unknown vector store provider: {other}"))),
    }
}

/// Queue every existing corpus file at low priority so live events keep
/// precedence while the initial scan catches up.
fn enqueue_initial_scan(
    config: &Config,
    queue: &Arc<EventQueue>,
    processor: &Arc<Processor>,
    gitignore: &Arc<GitignoreFilter>,
) {
    let ignored: Vec<glob::Pattern> = config
        .watch
        .ignored
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    let files = scan::discover_files(&config.watch.paths, &ignored, gitignore);
    info!(files = files.len(), "initial scan enqueued");

    for path in files {
        let processor = Arc::clone(processor);
        let handler: EventHandler = Box::new(move |event: FileEvent| {
            Box::pin(async move {
                processor.process_file(&event.path).await;
                Ok(())
            })
        });
        queue.enqueue(
            FileEvent { kind: EventKind::Create, path, priority: Priority::Low },
            handler,
        );
    }
}

// ── Config hot reload ─────────────────────────────────────────────────────────

/// Watches the config file and swaps recompiled rules into the processor.
/// Invalid edits keep the previous table.
struct ConfigWatcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    fn start(
        config_path: PathBuf,
        debounce: Duration,
        processor: Arc<Processor>,
    ) -> Result<Self, AppError> {
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| AppError::Watch(format!("create config watcher: {e}")))?;

        let watch_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| AppError::Watch(format!("watch {}: {e}", watch_dir.display())))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reload_loop(watcher, rx, config_path, debounce, processor, cancel.clone()));
        Ok(Self { cancel, task })
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn reload_loop(
    _watcher: RecommendedWatcher,
    mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    config_path: PathBuf,
    debounce: Duration,
    processor: Arc<Processor>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = rx.recv() => {
                let Some(received) = received else { break };
                if !event_touches(&received, &config_path) {
                    continue;
                }

                // Quiet window, then collapse the burst to one reload.
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                reload_rules(&config_path, &processor);
            }
        }
    }
}

fn event_touches(received: &notify::Result<notify::Event>, config_path: &Path) -> bool {
    match received {
        Ok(event) => event.paths.iter().any(|p| p == config_path
            || p.file_name() == config_path.file_name()),
        Err(_) => false,
    }
}

fn reload_rules(config_path: &Path, processor: &Arc<Processor>) {
    match crate::config::load(config_path) {
        Ok(config) => match RuleSet::compile(config.inference_rules, config.maps) {
            Ok(rules) => {
                info!(rules = rules.len(), "config reloaded, rules swapped");
                processor.update_rules(rules);
            }
            Err(e) => error!(error = %e, "config reload: rule compile failed, keeping previous rules"),
        },
        Err(e) => error!(error = %e, "config reload failed, keeping previous rules"),
    }
}
