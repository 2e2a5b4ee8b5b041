//! SQL queries for the `jobs` table.
//!
//! Free functions over a shared [`SqlitePool`]; all job mutation in the crate
//! goes through here. Timestamps are persisted as fixed-width RFC 3339 UTC
//! text so that SQL comparisons are chronological.

use crate::schema::{Job, JobState, MetricsSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;

/// Cap on the backoff exponent; keeps the delay arithmetic far from overflow.
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Render a timestamp the way the store persists them.
pub(crate) fn sql_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Insert a new job row, stamping `created_at = updated_at = now`.
///
/// An id collision surfaces as a database unique-violation error.
pub async fn create(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
    let now = sql_ts(Utc::now());

    sqlx::query(
        r"
        INSERT INTO jobs
            (id, command, state, attempts, max_retries, priority,
             run_at, output, duration, last_error, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
        ",
    )
    .bind(&job.id)
    .bind(&job.command)
    .bind(job.state)
    .bind(job.attempts)
    .bind(job.max_retries)
    .bind(job.priority)
    .bind(job.run_at.map(sql_ts))
    .bind(&job.output)
    .bind(job.duration)
    .bind(job.last_error.as_deref())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically claim the best eligible job for `worker_id`.
///
/// Eligible rows are `pending` or retryable `failed` with an absent or elapsed
/// `run_at`, picked by `priority DESC, created_at ASC`. The state guard on the
/// update is the race gate: the whole statement executes atomically, so at
/// most one claimer can move any given row into `processing`. Returns `None`
/// when the queue has no eligible work.
pub async fn claim(pool: &SqlitePool, worker_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let now = sql_ts(Utc::now());
    let mut tx = pool.begin().await?;

    let job = sqlx::query_as::<_, Job>(
        r"
        UPDATE jobs
        SET state = 'processing', updated_at = ?1
        WHERE id = (
            SELECT id FROM jobs
            WHERE state IN ('pending', 'failed')
              AND (run_at IS NULL OR run_at <= ?1)
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
        )
          AND state IN ('pending', 'failed')
        RETURNING *
        ",
    )
    .bind(&now)
    .fetch_optional(&mut *tx)
    .await?;

    match job {
        Some(job) => {
            tx.commit().await?;
            debug!(job.id = %job.id, worker.id = worker_id, "claimed job");
            Ok(Some(job))
        }
        None => {
            tx.rollback().await?;
            Ok(None)
        }
    }
}

/// Persist a successful run, reading `output` and `duration` off `job`.
///
/// The row must still be `processing`; anything else means another writer got
/// there first and the call fails with [`sqlx::Error::RowNotFound`].
pub async fn mark_completed(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r"
        UPDATE jobs
        SET state = 'completed', output = ?2, duration = ?3, updated_at = ?4
        WHERE id = ?1 AND state = 'processing'
        ",
    )
    .bind(&job.id)
    .bind(&job.output)
    .bind(job.duration)
    .bind(sql_ts(Utc::now()))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Record a failed attempt and apply the retry/DLQ policy.
///
/// Bumps `attempts` and stores `err_msg`. At the `max_retries` cap the job
/// moves to `dead` with `run_at` cleared; below it the job returns to the
/// retry lane as `failed` with `run_at = now + base_delay * 2^(attempts - 1)`.
pub async fn mark_failed(
    pool: &SqlitePool,
    job: &Job,
    err_msg: &str,
    base_delay: Duration,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let attempts = job.attempts + 1;

    let (state, run_at) = if attempts >= job.max_retries {
        (JobState::Dead, None)
    } else {
        let shift = u32::try_from(attempts - 1)
            .unwrap_or(0)
            .min(MAX_BACKOFF_SHIFT);
        let delay = base_delay.saturating_mul(1 << shift);
        let next_run = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (JobState::Failed, Some(next_run))
    };

    let result = sqlx::query(
        r"
        UPDATE jobs
        SET state = ?2, attempts = ?3, last_error = ?4, run_at = ?5, updated_at = ?6
        WHERE id = ?1 AND state = 'processing'
        ",
    )
    .bind(&job.id)
    .bind(state)
    .bind(attempts)
    .bind(err_msg)
    .bind(run_at.map(sql_ts))
    .bind(sql_ts(now))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// List jobs, optionally filtered by state.
///
/// Ordering favours priority, then age: `priority DESC, created_at ASC` by
/// default, with `newest_first` flipping the `created_at` leg. A non-positive
/// `limit` falls back to 100.
pub async fn list(
    pool: &SqlitePool,
    states: &[JobState],
    limit: i64,
    offset: i64,
    newest_first: bool,
) -> Result<Vec<Job>, sqlx::Error> {
    let limit = if limit <= 0 { 100 } else { limit };

    let mut query = "SELECT * FROM jobs".to_string();

    if !states.is_empty() {
        let placeholders = vec!["?"; states.len()].join(", ");
        query.push_str(&format!(" WHERE state IN ({placeholders})"));
    }

    query.push_str(if newest_first {
        " ORDER BY priority DESC, created_at DESC"
    } else {
        " ORDER BY priority DESC, created_at ASC"
    });
    query.push_str(" LIMIT ? OFFSET ?");

    let mut query_builder = sqlx::query_as::<_, Job>(&query);
    for state in states {
        query_builder = query_builder.bind(*state);
    }

    query_builder
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

/// The number of jobs currently in `state`.
pub async fn count_by_state(pool: &SqlitePool, state: JobState) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE state = ?1")
        .bind(state)
        .fetch_one(pool)
        .await
}

/// Aggregate metrics over the whole table.
///
/// Issues independent count queries per state; the snapshot is not
/// transactionally consistent across them. An empty table yields zeros.
pub async fn metrics(pool: &SqlitePool) -> Result<MetricsSummary, sqlx::Error> {
    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
        .fetch_one(pool)
        .await?;

    let pending = count_by_state(pool, JobState::Pending).await?;
    let processing = count_by_state(pool, JobState::Processing).await?;
    let completed = count_by_state(pool, JobState::Completed).await?;
    let failed = count_by_state(pool, JobState::Failed).await?;
    let dead = count_by_state(pool, JobState::Dead).await?;

    let (avg_duration, avg_retries): (f64, f64) = sqlx::query_as(
        "SELECT COALESCE(AVG(duration), 0.0), COALESCE(AVG(attempts), 0.0) FROM jobs",
    )
    .fetch_one(pool)
    .await?;

    Ok(MetricsSummary {
        total,
        pending,
        processing,
        completed,
        failed,
        dead,
        avg_duration,
        avg_retries,
    })
}

/// Move a dead job back to `pending`, resetting its retry bookkeeping.
///
/// Fails with [`sqlx::Error::RowNotFound`] when `id` does not name a job in
/// the dead-letter queue.
pub async fn requeue_dead(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r"
        UPDATE jobs
        SET state = 'pending', attempts = 0, last_error = NULL, run_at = NULL, updated_at = ?2
        WHERE id = ?1 AND state = 'dead'
        ",
    )
    .bind(id)
    .bind(sql_ts(Utc::now()))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Release `processing` rows whose lease has expired back to `pending`.
///
/// A claim stamps `updated_at`, so a row that has sat in `processing` longer
/// than `lease` belongs to a worker that died mid-execution. Returns the
/// number of rows released.
pub async fn release_stale(pool: &SqlitePool, lease: Duration) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    let cutoff = chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let result = sqlx::query(
        r"
        UPDATE jobs
        SET state = 'pending', updated_at = ?1
        WHERE state = 'processing' AND updated_at <= ?2
        ",
    )
    .bind(sql_ts(now))
    .bind(sql_ts(cutoff))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
