//! Error types for job enqueueing.

use thiserror::Error;

/// Errors returned when enqueueing a job.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The job descriptor had an empty command line.
    #[error("job command must not be empty")]
    EmptyCommand,

    /// Both a relative delay and an absolute run-at time were supplied.
    #[error("delay and run_at are mutually exclusive")]
    ScheduleConflict,

    /// A job with the same id already exists.
    #[error("a job with id {0:?} already exists")]
    DuplicateId(String),

    /// The insert failed at the database layer.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
