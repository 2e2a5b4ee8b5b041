use crate::worker::{Worker, WorkerConfig};
use futures_util::future::join_all;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

/// Supervises a pool of workers sharing one store handle.
///
/// Workers are named `worker-1` through `worker-<count>`. A single
/// cancellation token stops the whole pool: sleeps wake immediately, but an
/// in-flight subprocess is never killed — each worker finishes executing and
/// settling its current job before exiting, so the worker `exec_timeout`
/// bounds the worst-case shutdown latency.
#[derive(Debug)]
pub struct Runner {
    pool: SqlitePool,
    count: usize,
    config: WorkerConfig,
}

impl Runner {
    /// Create a runner that will launch `count` workers (at least one).
    pub fn new(pool: SqlitePool, count: usize) -> Self {
        Self {
            pool,
            count: count.max(1),
            config: WorkerConfig::default(),
        }
    }

    /// Set how often idle workers poll for new jobs.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    /// Set the upper bound for the adaptive idle sleep.
    pub fn max_sleep(mut self, max_sleep: Duration) -> Self {
        self.config.max_sleep = max_sleep;
        self
    }

    /// Set the base delay for the exponential retry backoff.
    pub fn retry_base_delay(mut self, retry_base_delay: Duration) -> Self {
        self.config.retry_base_delay = retry_base_delay;
        self
    }

    /// Set the execution deadline for a single job.
    pub fn exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.config.exec_timeout = exec_timeout;
        self
    }

    /// Start the workers.
    ///
    /// Returns a [`RunHandle`] that can be used to wait for the pool to shut
    /// down after `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> RunHandle {
        let mut handles = Vec::with_capacity(self.count);

        for i in 1..=self.count {
            let name = format!("worker-{i}");
            info!(worker.id = %name, "starting worker");

            let worker = Worker {
                pool: self.pool.clone(),
                config: WorkerConfig {
                    id: name.clone(),
                    ..self.config.clone()
                },
                shutdown: shutdown.clone(),
            };

            let span = info_span!("worker", worker.id = %name);
            let handle = tokio::spawn(async move { worker.run().instrument(span).await });

            handles.push(handle);
        }

        RunHandle { handles }
    }
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for every worker to shut down.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "worker task panicked");
            }
        });
    }
}
