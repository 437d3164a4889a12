//! Harness error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown scenario `{0}` (use `harness list` to see the catalog)")]
    UnknownScenario(String),

    #[error("runtime setup failed: {0}")]
    Runtime(#[from] frankenthread_core::ThreadError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("logger already installed")]
    LoggerInstalled,
}
