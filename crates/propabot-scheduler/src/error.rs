use thiserror::Error;

use propabot_core::CoreError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule cannot be resolved to a point in time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Config(#[from] CoreError),

    /// The blocking ledger task died before returning.
    #[error("Ledger task failed: {0}")]
    Ledger(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
