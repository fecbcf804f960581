//! Worker registry operations: registration, heartbeats, staleness.

use std::time::Duration;

use uuid::Uuid;

use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::models::{Worker, WorkerStatus};

/// Worker registry operations.
pub struct WorkerOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> WorkerOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Register a worker, generating an id when the caller supplied none.
    ///
    /// Re-registering an existing id refreshes its heartbeat and hostname
    /// instead of failing, so a restarted worker keeps its identity.
    pub async fn register(&self, id: Option<String>, hostname: &str) -> Result<Worker> {
        let id = id.unwrap_or_else(|| format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]));
        let worker = sqlx::query_as::<_, Worker>(
            "INSERT INTO workers (id, hostname, status, last_heartbeat)
             VALUES ($1, $2, 'idle', NOW())
             ON CONFLICT (id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                status = 'idle',
                last_heartbeat = NOW()
             RETURNING *",
        )
        .bind(&id)
        .bind(hostname)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(worker)
    }

    pub async fn get(&self, id: &str) -> Result<Worker> {
        sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::NotFound { entity: "worker" })
    }

    pub async fn list(&self) -> Result<Vec<Worker>> {
        let workers =
            sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY created_at ASC")
                .fetch_all(self.ctx.pool())
                .await?;
        Ok(workers)
    }

    /// Record a heartbeat. Later sends overwrite earlier ones; there is no
    /// merging, so a worker's reported state is always its latest.
    pub async fn heartbeat(
        &self,
        id: &str,
        hostname: &str,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workers
             SET hostname = $2, status = $3, current_job_id = $4, last_heartbeat = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(hostname)
        .bind(status)
        .bind(current_job_id)
        .execute(self.ctx.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound { entity: "worker" });
        }
        Ok(())
    }

    /// Mark workers silent for longer than `timeout` as offline and return
    /// `(worker_id, held_job_id)` for each, so the caller can release the
    /// held jobs. Idempotent: already-offline workers are not revisited.
    pub async fn mark_stale_offline(&self, timeout: Duration) -> Result<Vec<(String, Option<Uuid>)>> {
        let rows: Vec<(String, Option<Uuid>)> = sqlx::query_as(
            "UPDATE workers
             SET status = 'offline'
             WHERE status <> 'offline'
               AND last_heartbeat < NOW() - make_interval(secs => $1::double precision)
             RETURNING id, current_job_id",
        )
        .bind(timeout.as_secs_f64())
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Garbage-collect workers that have been offline longer than
    /// `retention`. Their held jobs were already released when they went
    /// offline.
    pub async fn gc_offline(&self, retention: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM workers
             WHERE status = 'offline'
               AND last_heartbeat < NOW() - make_interval(secs => $1::double precision)",
        )
        .bind(retention.as_secs_f64())
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Unregister a worker. The caller is responsible for releasing any job
    /// it still holds.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound { entity: "worker" });
        }
        Ok(())
    }
}
