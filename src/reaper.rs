use crate::storage;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Janitor for jobs orphaned in `processing` by a dead worker.
///
/// Every `interval` it releases `processing` rows whose `updated_at` lease is
/// older than `lease` back to `pending`. The lease must comfortably exceed
/// the worker `exec_timeout`, or live jobs get requeued under their workers.
#[derive(Debug, Clone, Copy)]
pub struct Reaper {
    /// How often to scan for expired leases.
    pub interval: Duration,
    /// Age of `updated_at` after which a `processing` row counts as orphaned.
    pub lease: Duration,
}

impl Reaper {
    /// Build a reaper that scans once per `lease` period.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            interval: lease,
            lease,
        }
    }

    /// Spawn the reaper loop; it stops when `shutdown` fires.
    pub fn start(self, pool: SqlitePool, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(lease = ?self.lease, "reaper started");
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown.cancelled() => break,
                }

                match storage::release_stale(&pool, self.lease).await {
                    Ok(0) => {}
                    Ok(released) => info!(released, "released stale processing jobs"),
                    Err(error) => error!(%error, "failed to release stale jobs"),
                }
            }

            info!("reaper stopped");
        })
    }
}
