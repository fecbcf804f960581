//! Worker fleet health monitor.
//!
//! Scans the registry on an interval, marks silent workers offline, and
//! releases any job they were holding so the dispatcher re-surfaces it.
//! Workers offline past the retention window are garbage collected on the
//! same sweep.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::DbContext;
use crate::error::Error;
use crate::services::Service;

pub struct HeartbeatMonitor {
    db: DbContext,
    interval: Duration,
    timeout: Duration,
    retention: Duration,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    pub fn new(db: DbContext, interval: Duration, timeout: Duration, retention: Duration) -> Self {
        Self {
            db,
            interval,
            timeout,
            retention,
            cancel: CancellationToken::new(),
        }
    }

    /// One sweep. Safe to re-run at any time: already-offline workers are
    /// skipped and releasing a pending job is a no-op.
    pub async fn tick(&self) {
        let stale = match self.db.workers().mark_stale_offline(self.timeout).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = ?e, "heartbeat sweep failed");
                return;
            }
        };

        for (worker_id, held_job) in stale {
            info!(worker_id, "worker went offline (missed heartbeats)");
            let Some(job_id) = held_job else { continue };
            match self.db.jobs().release(job_id).await {
                Ok(_) => info!(worker_id, job_id = %job_id, "released orphaned job"),
                // The job may have finished right as the worker went dark.
                Err(Error::Terminal(_)) => {}
                Err(e) => warn!(worker_id, job_id = %job_id, error = ?e, "failed to release orphaned job"),
            }
        }

        match self.db.workers().gc_offline(self.retention).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "garbage-collected offline workers"),
            Err(e) => warn!(error = ?e, "offline worker gc failed"),
        }
    }
}

#[async_trait::async_trait]
impl Service for HeartbeatMonitor {
    fn name(&self) -> &'static str {
        "heartbeat-monitor"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let mut ticker = tokio::time::interval(self.interval);
        // Skip the immediate first tick so freshly restarted fleets get one
        // interval to start heartbeating.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        Ok(())
    }
}
