//! Debounced, priority-segregated, rate-limited work queue.
//!
//! Events are coalesced per `(priority, path)` key: each enqueue replaces
//! the pending entry and restarts its debounce timer, so a burst collapses
//! to the latest event. Fired entries move into one of two FIFO lanes;
//! the scheduler drains normal before low, bounded by the concurrency cap
//! and an optional token bucket sized in events per minute. `drain` resolves
//! when the queue is fully idle.
//!
//! Invariants:
//! - at most one handler runs per key at a time, and it sees the latest
//!   coalesced event; earlier versions are discarded silently
//! - all normal-priority entries dispatch before any low-priority entry
//!   within a scheduling pass
//! - token starvation parks the head entry and retries in ~250 ms

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;

/// Park interval while waiting for rate-limit tokens.
const RATE_RETRY: Duration = Duration::from_millis(250);

// ── Event model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    Low,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub kind: EventKind,
    pub path: PathBuf,
    pub priority: Priority,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>>;
pub type EventHandler = Box<dyn FnOnce(FileEvent) -> HandlerFuture + Send>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub debounce: Duration,
    pub concurrency: usize,
    /// Token-bucket capacity in events per minute; `None` disables limiting.
    pub rate_per_minute: Option<f64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(500), concurrency: 2, rate_per_minute: None }
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

type Key = (Priority, PathBuf);

struct PendingEntry {
    event: FileEvent,
    handler: EventHandler,
    /// Guards against a superseded timer firing after replacement.
    seq: u64,
    timer: JoinHandle<()>,
}

struct State {
    started: bool,
    latest: HashMap<Key, PendingEntry>,
    normal: VecDeque<(FileEvent, EventHandler)>,
    low: VecDeque<(FileEvent, EventHandler)>,
    active: usize,
    /// Keys with a handler in flight; entries for these keys stay parked so
    /// at most one handler runs per key.
    running: HashSet<Key>,
    tokens: f64,
    last_refill: Instant,
    next_seq: u64,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl State {
    fn is_idle(&self) -> bool {
        self.active == 0 && self.normal.is_empty() && self.low.is_empty() && self.latest.is_empty()
    }
}

struct Inner {
    cfg: QueueConfig,
    state: Mutex<State>,
    wake: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct EventQueue {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl EventQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        let cfg = QueueConfig { concurrency: cfg.concurrency.max(1), ..cfg };
        let inner = Arc::new(Inner {
            cfg,
            state: Mutex::new(State {
                started: false,
                latest: HashMap::new(),
                normal: VecDeque::new(),
                low: VecDeque::new(),
                active: 0,
                running: HashSet::new(),
                // One token of initial burst; refill accrues from here.
                tokens: 1.0,
                last_refill: Instant::now(),
                next_seq: 0,
                drain_waiters: Vec::new(),
            }),
            wake: Notify::new(),
        });
        Self { inner, scheduler: Mutex::new(None), shutdown: CancellationToken::new() }
    }

    /// Register an event under its `(priority, path)` key, replacing any
    /// pending entry and restarting the debounce timer. Legal before
    /// `start`; entries wait until dispatch begins.
    pub fn enqueue(&self, event: FileEvent, handler: EventHandler) {
        let key: Key = (event.priority, event.path.clone());
        let mut state = self.inner.lock();

        state.next_seq += 1;
        let seq = state.next_seq;

        let timer = tokio::spawn(fire_after(Arc::clone(&self.inner), key.clone(), seq));
        if let Some(prev) = state.latest.insert(key, PendingEntry { event, handler, seq, timer }) {
            prev.timer.abort();
        }
    }

    /// Switch from accept-only to accept-and-dispatch.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock();
            if state.started {
                return;
            }
            state.started = true;
        }
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(schedule_loop(inner, shutdown));
        *self.scheduler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.inner.wake.notify_one();
    }

    /// No active handlers, both lanes empty, no pending debounce entries.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().is_idle()
    }

    /// Resolve immediately when idle, otherwise when the queue next becomes
    /// idle after a handler completion.
    pub async fn drain(&self) {
        let rx = {
            let mut state = self.inner.lock();
            if state.is_idle() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.drain_waiters.push(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Stop the scheduler and cancel pending debounce timers. Running
    /// handlers finish on their own tasks.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut state = self.inner.lock();
        for (_, entry) in state.latest.drain() {
            entry.timer.abort();
        }
        if let Some(handle) = self.scheduler.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Debounce timer body: after the quiet window, move the entry (if still
/// current) into its priority lane and wake the scheduler.
async fn fire_after(inner: Arc<Inner>, key: Key, seq: u64) {
    tokio::time::sleep(inner.cfg.debounce).await;

    let mut state = inner.lock();
    let current = state.latest.get(&key).is_some_and(|e| e.seq == seq);
    if !current {
        return;
    }
    let entry = match state.latest.remove(&key) {
        Some(e) => e,
        None => return,
    };
    match entry.event.priority {
        Priority::Normal => state.normal.push_back((entry.event, entry.handler)),
        Priority::Low => state.low.push_back((entry.event, entry.handler)),
    }
    drop(state);
    inner.wake.notify_one();
}

async fn schedule_loop(inner: Arc<Inner>, shutdown: CancellationToken) {
    loop {
        let rate_starved = dispatch_ready(&inner);
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RATE_RETRY), if rate_starved => {},
            _ = inner.wake.notified(), if !rate_starved => {},
        }
    }
}

/// Dispatch entries while concurrency and tokens allow. Returns `true` when
/// work is pending but the token bucket is empty.
fn dispatch_ready(inner: &Arc<Inner>) -> bool {
    let mut state = inner.lock();
    if !state.started {
        return false;
    }

    while state.active < inner.cfg.concurrency {
        // Normal lane first; entries whose key already has a handler in
        // flight stay parked until that handler completes.
        let picked = dispatchable_position(&state.normal, &state.running)
            .map(|pos| (true, pos))
            .or_else(|| dispatchable_position(&state.low, &state.running).map(|pos| (false, pos)));
        let Some((from_normal, pos)) = picked else {
            return false;
        };

        if let Some(capacity) = inner.cfg.rate_per_minute {
            refill_tokens(&mut state, capacity);
            if state.tokens < 1.0 {
                // Entry stays parked in its lane.
                return true;
            }
            state.tokens -= 1.0;
        }

        let lane = if from_normal { &mut state.normal } else { &mut state.low };
        let Some((event, handler)) = lane.remove(pos) else {
            return false;
        };
        let key: Key = (event.priority, event.path.clone());

        state.active += 1;
        state.running.insert(key.clone());
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let path = event.path.clone();
            if let Err(e) = handler(event).await {
                warn!(path = %path.display(), error = %e, "queue handler failed");
            } else {
                debug!(path = %path.display(), "queue handler finished");
            }

            let waiters = {
                let mut state = inner.lock();
                state.active -= 1;
                state.running.remove(&key);
                if state.is_idle() { std::mem::take(&mut state.drain_waiters) } else { Vec::new() }
            };
            for waiter in waiters {
                let _ = waiter.send(());
            }
            inner.wake.notify_one();
        });
    }
    false
}

fn dispatchable_position(
    lane: &VecDeque<(FileEvent, EventHandler)>,
    running: &HashSet<Key>,
) -> Option<usize> {
    lane.iter()
        .position(|(event, _)| !running.contains(&(event.priority, event.path.clone())))
}

/// `tokens = min(capacity, tokens + elapsed_ms * capacity / 60000)`.
fn refill_tokens(state: &mut State, capacity: f64) {
    let now = Instant::now();
    let elapsed_ms = now.duration_since(state.last_refill).as_millis() as f64;
    state.tokens = capacity.min(state.tokens + elapsed_ms * capacity / 60_000.0);
    state.last_refill = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: EventKind, path: &str, priority: Priority) -> FileEvent {
        FileEvent { kind, path: PathBuf::from(path), priority }
    }

    /// Handler that appends `tag` to a shared log.
    fn logging_handler(log: Arc<Mutex<Vec<String>>>, tag: &str) -> EventHandler {
        let tag = tag.to_string();
        Box::new(move |_event| {
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_to_latest() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(50),
            concurrency: 1,
            rate_per_minute: None,
        });
        queue.start();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Three events for the same key at t = 0, 10, 20 ms, all inside one
        // debounce window.
        for (i, tag) in ["t0", "t10", "t20"].into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            queue.enqueue(
                event(EventKind::Modify, "/x", Priority::Normal),
                logging_handler(Arc::clone(&log), tag),
            );
        }

        queue.drain().await;
        assert_eq!(*log.lock().unwrap(), vec!["t20".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_priority_runs_before_low() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(50),
            concurrency: 1,
            rate_per_minute: None,
        });
        let log = Arc::new(Mutex::new(Vec::new()));

        // Enqueue before start: both wait, then normal must win.
        queue.enqueue(
            event(EventKind::Create, "/y", Priority::Low),
            logging_handler(Arc::clone(&log), "low"),
        );
        queue.enqueue(
            event(EventKind::Create, "/x", Priority::Normal),
            logging_handler(Arc::clone(&log), "normal"),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        queue.start();
        queue.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["normal".to_string(), "low".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_path_different_priority_are_distinct_keys() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(20),
            concurrency: 1,
            rate_per_minute: None,
        });
        queue.start();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(
            event(EventKind::Modify, "/x", Priority::Normal),
            logging_handler(Arc::clone(&log), "n"),
        );
        queue.enqueue(
            event(EventKind::Modify, "/x", Priority::Low),
            logging_handler(Arc::clone(&log), "l"),
        );

        queue.drain().await;
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_paces_completions() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(10),
            concurrency: 4,
            rate_per_minute: Some(60.0), // one per second
        });
        queue.start();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let done = Arc::clone(&done);
            queue.enqueue(
                event(EventKind::Create, &format!("/f{i}"), Priority::Normal),
                Box::new(move |_| {
                    Box::pin(async move {
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        let start = Instant::now();
        queue.drain().await;
        let elapsed = start.elapsed();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        // One initial token plus nine refills at 1 Hz.
        assert!(elapsed >= Duration::from_secs(8), "drained too fast: {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(12), "drained too slow: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn drain_on_idle_queue_returns_immediately() {
        let queue = EventQueue::new(QueueConfig::default());
        queue.start();
        queue.drain().await;
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_pending_debounce() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(100),
            concurrency: 1,
            rate_per_minute: None,
        });
        queue.start();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(
            event(EventKind::Create, "/x", Priority::Normal),
            logging_handler(Arc::clone(&log), "ran"),
        );
        assert!(!queue.is_idle());
        queue.drain().await;
        assert!(queue.is_idle());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_handler_still_completes_the_entry() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(10),
            concurrency: 1,
            rate_per_minute: None,
        });
        queue.start();

        queue.enqueue(
            event(EventKind::Create, "/x", Priority::Normal),
            Box::new(|_| Box::pin(async { Err(AppError::Queue("boom".into())) })),
        );
        queue.drain().await;
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn one_handler_per_key_at_a_time() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(10),
            concurrency: 4,
            rate_per_minute: None,
        });
        queue.start();

        let overlap = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // Second event for /x arrives after the first handler started; it
        // must wait for the first to finish even with free concurrency.
        for _ in 0..2 {
            let overlap = Arc::clone(&overlap);
            let peak = Arc::clone(&peak);
            queue.enqueue(
                event(EventKind::Modify, "/x", Priority::Normal),
                Box::new(move |_| {
                    Box::pin(async move {
                        let now = overlap.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        overlap.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
            // Past the debounce window, into the first handler's run.
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        queue.drain().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_bounds_active_handlers() {
        let queue = EventQueue::new(QueueConfig {
            debounce: Duration::from_millis(10),
            concurrency: 2,
            rate_per_minute: None,
        });
        queue.start();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            queue.enqueue(
                event(EventKind::Create, &format!("/f{i}"), Priority::Normal),
                Box::new(move |_| {
                    Box::pin(async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        queue.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
