use std::path::PathBuf;

/// Core error type for infrastructure failures.
///
/// Adapter crates map their specific errors into this type. Command failures
/// have their own closed taxonomy in [`crate::command::CommandError`]; an
/// `Error` that reaches the dispatcher is treated as an internal fault.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
