use crate::errors::EnqueueError;
use crate::schema::{Job, JobState};
use crate::storage;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

/// Retry cap applied when the descriptor does not set a positive one.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Descriptor for a job to enqueue.
///
/// Deserializable from the CLI's JSON payload
/// (`{"id"?, "command", "max_retries"?, "priority"?, "run_at"?}`); `delay` is
/// a flag-only alternative to `run_at` and not part of the payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJob {
    /// Client-supplied id; auto-generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Shell command line to execute.
    pub command: String,
    /// Attempts cap before the job moves to the dead-letter queue.
    #[serde(default)]
    pub max_retries: Option<i64>,
    /// Higher runs first; ties break oldest-first.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Earliest instant the job may be claimed, RFC 3339 UTC.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Relative alternative to `run_at`; mutually exclusive with it.
    #[serde(skip)]
    pub delay: Option<Duration>,
}

/// Validate `new_job` and insert it as a `pending` row.
///
/// Returns the stored job id. Nothing is written when validation fails.
pub async fn enqueue(pool: &SqlitePool, new_job: NewJob) -> Result<String, EnqueueError> {
    if new_job.command.trim().is_empty() {
        return Err(EnqueueError::EmptyCommand);
    }
    if new_job.delay.is_some() && new_job.run_at.is_some() {
        return Err(EnqueueError::ScheduleConflict);
    }

    let now = Utc::now();
    let run_at = match new_job.delay {
        Some(delay) => Some(
            chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        ),
        None => new_job.run_at,
    };

    let id = new_job
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("job-{}", Uuid::new_v4()));

    let job = Job {
        id: id.clone(),
        command: new_job.command,
        state: JobState::Pending,
        attempts: 0,
        max_retries: new_job
            .max_retries
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_RETRIES),
        priority: new_job.priority.unwrap_or(0),
        run_at,
        output: String::new(),
        duration: 0.0,
        last_error: None,
        created_at: now,
        updated_at: now,
    };

    match storage::create(pool, &job).await {
        Ok(()) => Ok(id),
        Err(error) if is_unique_violation(&error) => Err(EnqueueError::DuplicateId(id)),
        Err(error) => Err(EnqueueError::Database(error)),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
