//! Error types for workers and the pool manager.

use std::time::Duration;

use db::DbError;
use pipeline_core::PortError;

/// Why one job attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("briefing {0} not found")]
    BriefingNotFound(String),

    #[error("{0}")]
    Collaborator(#[from] PortError),

    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error("job timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Whether the job may go back to the queue for another attempt.
    ///
    /// Only a missing briefing is permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::BriefingNotFound(_))
    }
}

/// Errors returned by [`WorkerPool`](crate::WorkerPool) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is not running")]
    NotRunning,

    #[error("cannot remove the last budget worker")]
    LastWorker,

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("actor error: {0}")]
    Actor(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<DbError> for PoolError {
    fn from(err: DbError) -> Self {
        PoolError::Store(err.to_string())
    }
}

/// SMTP setup and delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("invalid message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
