#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use claims::{assert_gt, assert_lt, assert_none, assert_ok};
use queuectl::schema::JobState;
use queuectl::{NewJob, Runner, db, enqueue, executor, storage};
use sqlx::SqlitePool;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Test utilities and common setup
mod test_utils {
    use super::*;
    use queuectl::schema::Job;

    /// Create a file-backed test database in a fresh temp dir.
    pub(super) async fn setup_test_db() -> (SqlitePool, TempDir) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let pool = db::connect(dir.path().join("queue.db"))
            .await
            .expect("failed to open test database");
        db::setup_database(&pool)
            .await
            .expect("failed to create schema");
        (pool, dir)
    }

    /// A runner tuned for fast test turnaround.
    pub(super) fn test_runner(pool: SqlitePool, count: usize) -> Runner {
        Runner::new(pool, count)
            .poll_interval(Duration::from_millis(25))
            .max_sleep(Duration::from_millis(100))
            .retry_base_delay(Duration::from_millis(50))
            .exec_timeout(Duration::from_secs(5))
    }

    pub(super) async fn fetch_job(pool: &SqlitePool, id: &str) -> Job {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .expect("job not found")
    }

    /// Poll until the job reaches `state`, panicking after `timeout`.
    pub(super) async fn wait_for_state(
        pool: &SqlitePool,
        id: &str,
        state: JobState,
        timeout: Duration,
    ) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = fetch_job(pool, id).await;
            if job.state == state {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {:?} while waiting for {state:?}",
                job.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test]
async fn completes_enqueued_job() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "echo hello".into(),
                ..NewJob::default()
            }
        )
        .await
    );

    let handle = test_utils::test_runner(pool.clone(), 1).start(shutdown.clone());

    let job =
        test_utils::wait_for_state(&pool, &id, JobState::Completed, Duration::from_secs(5)).await;
    assert!(job.output.contains("hello"), "output: {:?}", job.output);
    assert_gt!(job.duration, 0.0);
    assert_eq!(job.attempts, 0);
    assert_none!(job.last_error);

    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn retries_then_parks_in_dlq() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "exit 2".into(),
                max_retries: Some(3),
                ..NewJob::default()
            }
        )
        .await
    );

    let handle = test_utils::test_runner(pool.clone(), 2).start(shutdown.clone());

    let job = test_utils::wait_for_state(&pool, &id, JobState::Dead, Duration::from_secs(10)).await;
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some("exit status 2"));
    assert_none!(job.run_at);

    // The DLQ listing surfaces it.
    let dlq = assert_ok!(storage::list(&pool, &[JobState::Dead], 0, 0, true).await);
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id, id);

    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn higher_priority_runs_first() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    assert_ok!(
        enqueue(
            &pool,
            NewJob {
                id: Some("low".into()),
                command: "true".into(),
                ..NewJob::default()
            }
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_ok!(
        enqueue(
            &pool,
            NewJob {
                id: Some("high".into()),
                command: "true".into(),
                priority: Some(10),
                ..NewJob::default()
            }
        )
        .await
    );

    // A single worker drains the queue strictly in claim order.
    let handle = test_utils::test_runner(pool.clone(), 1).start(shutdown.clone());

    let high =
        test_utils::wait_for_state(&pool, "high", JobState::Completed, Duration::from_secs(5))
            .await;
    let low =
        test_utils::wait_for_state(&pool, "low", JobState::Completed, Duration::from_secs(5)).await;
    assert_lt!(high.updated_at, low.updated_at);

    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn honours_run_at_schedule() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "true".into(),
                run_at: Some(chrono::Utc::now() + chrono::Duration::milliseconds(700)),
                ..NewJob::default()
            }
        )
        .await
    );

    let handle = test_utils::test_runner(pool.clone(), 1).start(shutdown.clone());

    // Well before run_at the job must still be waiting.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(
        test_utils::fetch_job(&pool, &id).await.state,
        JobState::Pending
    );

    test_utils::wait_for_state(&pool, &id, JobState::Completed, Duration::from_secs(5)).await;

    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn times_out_runaway_job() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "sleep 30".into(),
                max_retries: Some(1),
                ..NewJob::default()
            }
        )
        .await
    );

    let handle = test_utils::test_runner(pool.clone(), 1)
        .exec_timeout(Duration::from_millis(300))
        .start(shutdown.clone());

    let job = test_utils::wait_for_state(&pool, &id, JobState::Dead, Duration::from_secs(10)).await;
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some(executor::TIMEOUT_ERROR));

    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn dlq_requeue_runs_job_again() {
    let (pool, _dir) = test_utils::setup_test_db().await;

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "exit 7".into(),
                max_retries: Some(1),
                ..NewJob::default()
            }
        )
        .await
    );

    // First life: straight to the DLQ.
    let shutdown = CancellationToken::new();
    let handle = test_utils::test_runner(pool.clone(), 1).start(shutdown.clone());
    test_utils::wait_for_state(&pool, &id, JobState::Dead, Duration::from_secs(10)).await;
    shutdown.cancel();
    handle.wait_for_shutdown().await;

    // Requeue resets the retry bookkeeping.
    assert_ok!(storage::requeue_dead(&pool, &id).await);
    let job = test_utils::fetch_job(&pool, &id).await;
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_none!(job.last_error);

    // Second life: runs again, fails again, dies again.
    let shutdown = CancellationToken::new();
    let handle = test_utils::test_runner(pool.clone(), 1).start(shutdown.clone());
    let job = test_utils::wait_for_state(&pool, &id, JobState::Dead, Duration::from_secs(10)).await;
    assert_eq!(job.attempts, 1);
    shutdown.cancel();
    handle.wait_for_shutdown().await;
}

#[tokio::test]
async fn workers_shut_down_gracefully_when_idle() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let handle = test_utils::test_runner(pool, 3).start(shutdown.clone());

    // Let the workers reach their idle sleep before pulling the plug.
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.cancel();

    assert_ok!(tokio::time::timeout(Duration::from_secs(5), handle.wait_for_shutdown()).await);
}

#[tokio::test]
async fn shutdown_waits_for_inflight_job() {
    let (pool, _dir) = test_utils::setup_test_db().await;
    let shutdown = CancellationToken::new();

    let id = assert_ok!(
        enqueue(
            &pool,
            NewJob {
                command: "sleep 1 && echo done".into(),
                ..NewJob::default()
            }
        )
        .await
    );

    let handle = test_utils::test_runner(pool.clone(), 1)
        .exec_timeout(Duration::from_secs(20))
        .start(shutdown.clone());

    test_utils::wait_for_state(&pool, &id, JobState::Processing, Duration::from_secs(5)).await;
    shutdown.cancel();
    assert_ok!(tokio::time::timeout(Duration::from_secs(10), handle.wait_for_shutdown()).await);

    // Cancellation never kills a running subprocess: the worker let the job
    // finish and settled it before exiting.
    let job = test_utils::fetch_job(&pool, &id).await;
    assert_eq!(job.state, JobState::Completed);
    assert!(job.output.contains("done"), "output: {:?}", job.output);
    assert_none!(job.last_error);
}
