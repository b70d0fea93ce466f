//! jeeves-watcher entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Locate and load the config document
//!   3. Init logger at the configured level
//!   4. Start the app and run until SIGINT/SIGTERM
//!   5. Drain and stop

use std::path::PathBuf;

use tracing::{error, info};

use jeeves_watcher::app::App;
use jeeves_watcher::error::AppError;
use jeeves_watcher::{config, logger};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config_path = locate_config()?;
    let config = config::load(&config_path)?;
    logger::init(&config.logging.level)?;

    info!(config = %config_path.display(), "config loaded");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Config(format!("start runtime: {e}")))?
        .block_on(async move {
            let app = App::start(config, config_path).await?;
            wait_for_shutdown_signal().await;
            app.stop().await;
            Ok(())
        })
}

/// First CLI argument, or `jeeves.config.json`, or `jeeves.config.yaml`.
fn locate_config() -> Result<PathBuf, AppError> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    for candidate in ["jeeves.config.json", "jeeves.config.yaml"] {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(AppError::Config(
        "no config found: pass a path or create jeeves.config.json".to_string(),
    ))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received");
    }
}
