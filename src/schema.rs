//! Database schema definitions.
//!
//! This module contains the job record and the aggregate types read from the
//! `jobs` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a [`Job`].
///
/// `Completed` and `Dead` are terminal; a dead job only leaves the
/// dead-letter queue through an explicit requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed; a worker is executing the command.
    Processing,
    /// Finished with exit code 0.
    Completed,
    /// Failed below the retry cap; claimable again once `run_at` elapses.
    Failed,
    /// Exhausted its retries; parked in the dead-letter queue.
    Dead,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// The lowercase name used in the database and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!(
                "unknown job state {other:?} (expected pending, processing, completed, failed, or dead)"
            )),
        }
    }
}

/// A job record in the `jobs` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    /// Unique identifier, client-supplied or auto-generated at enqueue.
    pub id: String,
    /// Shell command line executed verbatim by the worker.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of execution attempts that have finished, successful or not.
    pub attempts: i64,
    /// Attempts cap; reaching it moves the job to [`JobState::Dead`].
    pub max_retries: i64,
    /// Higher runs first; ties break oldest-first. Immutable after insert.
    pub priority: i64,
    /// Earliest instant the job may be claimed; `None` means immediately.
    pub run_at: Option<DateTime<Utc>>,
    /// Captured stdout and stderr of the last successful run.
    pub output: String,
    /// Wall-clock duration of the last completed execution, in seconds.
    pub duration: f64,
    /// Failure description from the last failed attempt.
    pub last_error: Option<String>,
    /// Set once at insert.
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation.
    pub updated_at: DateTime<Utc>,
}

/// Aggregate queue metrics computed by [`crate::storage::metrics`].
///
/// The per-state counts come from independent queries, so the snapshot is a
/// monitoring view rather than a transactionally consistent ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Total number of job rows.
    pub total: i64,
    /// Jobs waiting to be claimed.
    pub pending: i64,
    /// Jobs currently executing.
    pub processing: i64,
    /// Jobs that finished successfully.
    pub completed: i64,
    /// Jobs waiting for their retry backoff to elapse.
    pub failed: i64,
    /// Jobs in the dead-letter queue.
    pub dead: i64,
    /// Mean execution duration across all rows, in seconds; 0 when empty.
    pub avg_duration: f64,
    /// Mean attempt count across all rows; 0 when empty.
    pub avg_retries: f64,
}
