//! Result persistence. Raw payloads are append-only; the normalized
//! projection is maintained by the `project_result` trigger in the same
//! transaction as each insert.

use futures::TryStreamExt;
use uuid::Uuid;

use crate::db::DbContext;
use crate::error::Result;
use crate::models::JobResult;

/// Result operations.
pub struct ResultOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ResultOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, job_id: Uuid, data: serde_json::Value) -> Result<JobResult> {
        let result = sqlx::query_as::<_, JobResult>(
            "INSERT INTO results (job_id, data) VALUES ($1, $2) RETURNING *",
        )
        .bind(job_id)
        .bind(&data)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(result)
    }

    /// Batch insert via UNNEST in a single round-trip, preserving the order
    /// the worker produced the payloads in.
    pub async fn create_batch(&self, job_id: Uuid, payloads: &[serde_json::Value]) -> Result<u64> {
        if payloads.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO results (job_id, data)
             SELECT $1, v.data
             FROM UNNEST($2::jsonb[]) WITH ORDINALITY AS v(data, ord)
             ORDER BY v.ord",
        )
        .bind(job_id)
        .bind(payloads)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_by_job(
        &self,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobResult>> {
        let results = sqlx::query_as::<_, JobResult>(
            "SELECT * FROM results WHERE job_id = $1 ORDER BY id ASC LIMIT $2 OFFSET $3",
        )
        .bind(job_id)
        .bind(if limit > 0 { limit } else { 100 })
        .bind(offset.max(0))
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(results)
    }

    pub async fn count_by_job(&self, job_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(self.ctx.pool())
            .await?;
        Ok(count)
    }

    /// Stream every result for a job, in insertion order, each exactly once.
    ///
    /// The callback sees rows as they arrive from the cursor; a callback
    /// error aborts the stream and is returned to the caller.
    pub async fn stream_by_job<F>(&self, job_id: Uuid, mut callback: F) -> Result<u64>
    where
        F: FnMut(JobResult) -> Result<()>,
    {
        let mut rows = sqlx::query_as::<_, JobResult>(
            "SELECT * FROM results WHERE job_id = $1 ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch(self.ctx.pool());

        let mut seen = 0u64;
        while let Some(row) = rows.try_next().await? {
            callback(row)?;
            seen += 1;
        }
        Ok(seen)
    }
}
