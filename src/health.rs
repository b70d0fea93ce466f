//! Health supervisor: consecutive-failure tracking with exponential backoff.
//!
//! The watcher wraps every handler invocation: `backoff()` before the run,
//! `record_success` / `record_failure` after. At the failure threshold the
//! fatal callback fires and `record_failure` returns `false`, which the
//! watcher treats as "stop".

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures tolerated before the fatal callback fires.
    /// `None` means unbounded.
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(60_000),
        }
    }
}

pub type FatalCallback = Box<dyn Fn(&AppError) + Send + Sync>;

pub struct HealthMonitor {
    cfg: HealthConfig,
    failures: AtomicU32,
    on_fatal: Option<FatalCallback>,
}

impl HealthMonitor {
    pub fn new(cfg: HealthConfig) -> Self {
        Self { cfg, failures: AtomicU32::new(0), on_fatal: None }
    }

    /// Install the callback invoked when the failure threshold is reached.
    pub fn with_fatal(mut self, callback: FatalCallback) -> Self {
        self.on_fatal = Some(callback);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Reset the counter; logs a recovery line when failures were pending.
    pub fn record_success(&self) {
        let prior = self.failures.swap(0, Ordering::AcqRel);
        if prior > 0 {
            info!(failures = prior, "recovered after consecutive failures");
        }
    }

    /// Count a failure. Returns `false` when the threshold is reached, after
    /// invoking the fatal callback.
    pub fn record_failure(&self, error: &AppError) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(failures, error = %error, "failure recorded");

        match self.cfg.max_retries {
            Some(max) if failures >= max => {
                error!(failures, max, "failure threshold reached");
                if let Some(callback) = &self.on_fatal {
                    callback(error);
                }
                false
            }
            _ => true,
        }
    }

    /// `min(max_backoff, base_delay * 2^(failures-1))`, or zero with no
    /// pending failures.
    pub fn current_backoff(&self) -> Duration {
        let failures = self.consecutive_failures();
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(31);
        self.cfg
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.cfg.max_backoff)
    }

    /// Sleep for the current backoff; a cancellation fails fast.
    pub async fn backoff(&self, cancel: &CancellationToken) {
        let delay = self.current_backoff();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
