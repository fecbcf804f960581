//! Job queue operations: creation, lifecycle transitions, and the atomic
//! claim protocol.

use uuid::Uuid;

use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::models::{Job, JobConfig, JobStatus, QueueStats};

/// Fields required to enqueue a job. Everything else is derived.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub priority: i32,
    pub config: JobConfig,
}

/// Filters for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
    /// Oldest-first when set; default is newest-first.
    pub oldest_first: bool,
}

/// Job queue operations.
pub struct JobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> JobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a new job with `status = pending`.
    ///
    /// `total_places` is fixed here, at creation, from the config's seed
    /// estimate; progress updates never touch it again.
    pub async fn create(&self, new: NewJob) -> Result<Job> {
        let total = new.config.estimated_places();
        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO jobs_queue (name, priority, config, total_places)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(&new.name)
        .bind(new.priority)
        .bind(sqlx::types::Json(&new.config))
        .bind(total)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::NotFound { entity: "job" })
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let order = if filter.oldest_first {
            "ORDER BY created_at ASC"
        } else {
            "ORDER BY created_at DESC"
        };
        let query = format!(
            "SELECT * FROM jobs_queue
             WHERE ($1::job_status IS NULL OR status = $1)
               AND ($2::text IS NULL OR worker_id = $2)
             {order}
             LIMIT $3 OFFSET $4",
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(filter.status)
            .bind(filter.worker_id.as_deref())
            .bind(if filter.limit > 0 { filter.limit } else { 50 })
            .bind(filter.offset.max(0))
            .fetch_all(self.ctx.pool())
            .await?;
        Ok(jobs)
    }

    /// Apply a status transition, enforcing the transition table.
    ///
    /// A no-change request returns the job untouched. Terminal jobs reject
    /// every write with [`Error::Terminal`]; anything else the table forbids
    /// is [`Error::InvalidTransition`], and nothing is persisted.
    pub async fn update_status(&self, id: Uuid, to: JobStatus) -> Result<Job> {
        let mut tx = self.ctx.pool().begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs_queue WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound { entity: "job" })?;

        if job.status == to {
            tx.commit().await?;
            return Ok(job);
        }
        if job.status.is_terminal() {
            return Err(Error::Terminal(job.status));
        }
        if !job.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: job.status,
                to,
            });
        }

        let updated = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue SET
                status = $2,
                worker_id = CASE WHEN $3 THEN worker_id ELSE NULL END,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(to)
        .bind(to.is_held())
        .bind(to.is_terminal())
        .fetch_one(&mut *tx)
        .await?;

        if !to.is_held() {
            self.detach_worker(&mut tx, id).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Update scrape progress. `total_places` is set once at creation and
    /// deliberately not writable here.
    pub async fn update_progress(&self, id: Uuid, scraped: i32, failed: i32) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET scraped_places = $2, failed_places = $3, updated_at = NOW()
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
             RETURNING *",
        )
        .bind(id)
        .bind(scraped)
        .bind(failed)
        .fetch_optional(self.ctx.pool())
        .await?;

        match job {
            Some(job) => Ok(job),
            // Distinguish a missing job from a terminal one.
            None => match self.get(id).await {
                Ok(job) => Err(Error::Terminal(job.status)),
                Err(e) => Err(e),
            },
        }
    }

    /// Atomically claim the best available job for `worker_id`.
    ///
    /// One transaction: pick the highest-priority claimable job (oldest
    /// first on ties) with `FOR UPDATE SKIP LOCKED`, move it to `running`,
    /// and mark the worker busy. Concurrent claimers either get distinct
    /// jobs or `None`; no two ever see the same row. `queued` jobs (broker
    /// notified but not yet consumed) are claimable here too, so a polling
    /// worker can drain a queue whose consumers are gone.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>> {
        let mut tx = self.ctx.pool().begin().await?;

        let candidate = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs_queue
             WHERE status IN ('pending', 'queued')
             ORDER BY priority DESC, created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let claimed = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET status = 'running', worker_id = $2, started_at = NOW(), updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(candidate.id)
        .bind(worker_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE workers SET status = 'busy', current_job_id = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(claimed.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    /// Claim one specific job for `worker_id`, used when a broker delivery
    /// names the job.
    ///
    /// Atomic in the same way as [`JobOps::claim`]: the conditional update
    /// only succeeds while the job is still `pending` or `queued`, so of
    /// any number of redeliveries exactly one claims it. `None` means the
    /// job is already taken, finished, or gone — the caller should ack and
    /// move on.
    pub async fn claim_specific(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>> {
        let mut tx = self.ctx.pool().begin().await?;

        let claimed = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET status = 'running', worker_id = $2, started_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'queued')
             RETURNING *",
        )
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(claimed) = claimed else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE workers SET status = 'busy', current_job_id = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(claimed.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    /// Return a held job to the queue.
    ///
    /// Idempotent: releasing a job that is already `pending` or `queued` is
    /// a no-op. Terminal jobs return [`Error::Terminal`] unchanged.
    pub async fn release(&self, id: Uuid) -> Result<Job> {
        let mut tx = self.ctx.pool().begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs_queue WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound { entity: "job" })?;

        if job.status.is_terminal() {
            return Err(Error::Terminal(job.status));
        }
        if !job.status.is_held() {
            tx.commit().await?;
            return Ok(job);
        }

        let released = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET status = 'pending', worker_id = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        self.detach_worker(&mut tx, id).await?;

        tx.commit().await?;
        Ok(released)
    }

    /// Mark a running job completed and credit the worker's counters.
    pub async fn complete(&self, id: Uuid, worker_id: &str, places_scraped: i64) -> Result<Job> {
        let mut tx = self.ctx.pool().begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs_queue WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound { entity: "job" })?;

        if job.status.is_terminal() {
            return Err(Error::Terminal(job.status));
        }
        if job.status != JobStatus::Running {
            return Err(Error::InvalidTransition {
                from: job.status,
                to: JobStatus::Completed,
            });
        }

        let completed = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET status = 'completed', scraped_places = $2, worker_id = NULL,
                 completed_at = NOW(), updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(places_scraped as i32)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE workers
             SET status = 'idle', current_job_id = NULL,
                 jobs_completed = jobs_completed + 1,
                 places_scraped = places_scraped + $2
             WHERE id = $1",
        )
        .bind(worker_id)
        .bind(places_scraped)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(completed)
    }

    /// Mark a job failed with an error message. Allowed from any
    /// non-terminal state.
    pub async fn fail(&self, id: Uuid, message: &str) -> Result<Job> {
        let mut tx = self.ctx.pool().begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs_queue WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotFound { entity: "job" })?;

        if job.status.is_terminal() {
            return Err(Error::Terminal(job.status));
        }

        let failed = sqlx::query_as::<_, Job>(
            "UPDATE jobs_queue
             SET status = 'failed', error_message = $2, worker_id = NULL,
                 completed_at = NOW(), updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;

        self.detach_worker(&mut tx, id).await?;

        tx.commit().await?;
        Ok(failed)
    }

    /// Delete a job; results cascade at the schema level.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs_queue WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound { entity: "job" });
        }
        Ok(())
    }

    /// Aggregate counts by status.
    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = sqlx::query_as::<_, QueueStats>(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'paused') AS paused,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled
             FROM jobs_queue",
        )
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(stats)
    }

    /// Startup recovery: release held jobs whose worker is gone or offline.
    ///
    /// Jobs left `running` by an unclean manager shutdown re-enter the queue
    /// immediately instead of waiting out the heartbeat timeout.
    pub async fn release_orphans(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs_queue
             SET status = 'pending', worker_id = NULL, updated_at = NOW()
             WHERE status IN ('running', 'paused')
               AND (worker_id IS NULL
                    OR worker_id NOT IN (SELECT id FROM workers WHERE status <> 'offline'))",
        )
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear the holding worker's `current_job_id` when a job leaves a held
    /// state through any path other than claim.
    async fn detach_worker(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workers SET status = 'idle', current_job_id = NULL WHERE current_job_id = $1",
        )
        .bind(job_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
