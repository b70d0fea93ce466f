//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("extract error: {0}")]
    Extract(String),

    #[error("rules error: {0}")]
    Rules(String),

    #[error("embed error: {0}")]
    Embed(String),

    #[error("vector store error: {0}")]
    Vector(String),

    #[error("sidecar error: {0}")]
    Sidecar(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
