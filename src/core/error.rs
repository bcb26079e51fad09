//! Error types for scheduler components.

use thiserror::Error;

/// Errors produced by the scheduler, processor, and retry-policy
/// constructors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler (or processor) has been shut down. Submissions after
    /// stop always fail with this value; callers typically treat it as
    /// terminal.
    #[error("task scheduler is already shut down")]
    Closed,
    /// Construction-time validation failed.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// A retry policy was composed incorrectly.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

/// Application-facing result using anyhow for opaque errors (task
/// execution, processor submission).
pub type AppResult<T> = Result<T, anyhow::Error>;
