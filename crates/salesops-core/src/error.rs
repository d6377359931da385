//! Error taxonomy for the sales pipeline.

use thiserror::Error;

use crate::types::JobKind;

/// Every failure a pipeline component can report.
#[derive(Debug, Error)]
pub enum SalesOpsError {
    /// Malformed or unreadable configuration. Recovered by falling back to defaults.
    #[error("config error: {0}")]
    Config(String),

    /// Snapshot or prune I/O failure.
    #[error("backup failed: {0}")]
    Backup(String),

    /// The ETL engine reported failure.
    #[error("ETL failed: {0}")]
    Etl(String),

    /// Alert transport failed. Never escalated.
    #[error("notification failed: {0}")]
    Notification(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("report failed: {0}")]
    Report(String),

    #[error("{step} timed out after {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("{0} run already in progress")]
    AlreadyRunning(JobKind),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SalesOpsError {
    fn from(e: rusqlite::Error) -> Self {
        SalesOpsError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SalesOpsError>;
