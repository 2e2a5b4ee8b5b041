use crate::executor;
use crate::schema::Job;
use crate::storage;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

/// Number of idle polls after which the adaptive sleep stops doubling.
const MAX_IDLE_SHIFT: u32 = 5;

/// Tuning knobs for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker identity used in logs.
    pub id: String,
    /// Base interval between claim attempts.
    pub poll_interval: Duration,
    /// Upper bound for the adaptive idle sleep.
    pub max_sleep: Duration,
    /// Base delay for the exponential retry backoff.
    pub retry_base_delay: Duration,
    /// Execution deadline for a single job.
    pub exec_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(2),
            max_sleep: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(60),
        }
    }
}

pub(crate) struct Worker {
    pub(crate) pool: SqlitePool,
    pub(crate) config: WorkerConfig,
    pub(crate) shutdown: CancellationToken,
}

impl Worker {
    /// Run the claim → execute → settle loop until cancelled.
    ///
    /// No single job failure breaks the loop; store errors are logged and the
    /// worker simply polls again on the next tick.
    pub(crate) async fn run(&self) {
        info!("worker started");
        let mut idle_count: u32 = 0;

        while !self.shutdown.is_cancelled() {
            let job = match storage::claim(&self.pool, &self.config.id).await {
                Ok(job) => job,
                Err(error) => {
                    error!(%error, "failed to claim job");
                    self.pause(self.config.poll_interval).await;
                    continue;
                }
            };

            let Some(job) = job else {
                let sleep_for = self
                    .config
                    .poll_interval
                    .saturating_mul(1 << idle_count)
                    .min(self.config.max_sleep);
                trace!(sleep = ?sleep_for, "no eligible jobs, backing off");
                self.pause(sleep_for).await;
                if idle_count < MAX_IDLE_SHIFT {
                    idle_count += 1;
                }
                continue;
            };

            idle_count = 0;

            let span = info_span!("job", job.id = %job.id);
            self.process(job).instrument(span).await;
        }

        info!("worker stopped");
    }

    /// Execute one claimed job and settle it as completed or failed.
    ///
    /// Shutdown does not interrupt a running subprocess; the attempt runs to
    /// completion or to `exec_timeout` and is settled before the loop exits.
    async fn process(&self, mut job: Job) {
        debug!(job.command = %job.command, "executing job");

        let result = executor::execute(&job.command, self.config.exec_timeout).await;

        if result.success() {
            job.output = format!("{}\n{}", result.stdout, result.stderr);
            job.duration = result.duration;
            match storage::mark_completed(&self.pool, &job).await {
                Ok(()) => info!(duration = result.duration, "job completed"),
                Err(error) => error!(%error, "failed to mark job completed"),
            }
        } else {
            let err_msg = result.error_message();
            match storage::mark_failed(&self.pool, &job, &err_msg, self.config.retry_base_delay)
                .await
            {
                Ok(()) => warn!(error = %err_msg, "job failed"),
                Err(error) => error!(%error, "failed to mark job failed"),
            }
        }
    }

    /// Sleep for `duration`, waking early on shutdown.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.shutdown.cancelled() => {}
        }
    }
}
