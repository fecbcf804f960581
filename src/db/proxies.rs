//! Proxy and proxy-source persistence.

use crate::db::DbContext;
use crate::error::Result;
use crate::models::{Proxy, ProxySource, ProxyStatus};

/// How many consecutive failures demote a proxy to `dead`.
const DEMOTION_FAILURES: i32 = 5;

/// Proxy repository operations.
pub struct ProxyOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ProxyOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a freshly fetched candidate as `pending`. Duplicate
    /// `(ip, port)` rows are left untouched.
    pub async fn upsert_candidate(
        &self,
        ip: &str,
        port: i32,
        protocol: &str,
        source_id: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO proxies (ip, port, protocol, source_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (ip, port) DO NOTHING",
        )
        .bind(ip)
        .bind(port)
        .bind(protocol)
        .bind(source_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Record a successful validation: promote to `healthy` and fold the
    /// sample into the rolling response time (EMA, 30% weight on the new
    /// sample).
    pub async fn mark_healthy(&self, ip: &str, port: i32, response_time_ms: f64) -> Result<()> {
        sqlx::query(
            "UPDATE proxies SET
                status = 'healthy',
                success_count = success_count + 1,
                response_time_ms = CASE WHEN response_time_ms = 0 THEN $3
                                        ELSE response_time_ms * 0.7 + $3 * 0.3 END,
                uptime = 100.0 * (success_count + 1) / (success_count + 1 + fail_count),
                last_checked = NOW()
             WHERE ip = $1 AND port = $2",
        )
        .bind(ip)
        .bind(port)
        .bind(response_time_ms)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Record a failed validation or connect. Crossing the consecutive
    /// failure threshold demotes the proxy to `dead`.
    pub async fn mark_failure(&self, ip: &str, port: i32) -> Result<()> {
        sqlx::query(
            "UPDATE proxies SET
                fail_count = fail_count + 1,
                uptime = 100.0 * success_count / (success_count + fail_count + 1),
                status = CASE WHEN fail_count + 1 >= $3 THEN 'dead'::proxy_status
                              ELSE status END,
                last_checked = NOW()
             WHERE ip = $1 AND port = $2",
        )
        .bind(ip)
        .bind(port)
        .bind(DEMOTION_FAILURES)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    pub async fn record_use(&self, ip: &str, port: i32) -> Result<()> {
        sqlx::query("UPDATE proxies SET last_used = NOW() WHERE ip = $1 AND port = $2")
            .bind(ip)
            .bind(port)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    /// All healthy proxies, for pool refills at startup.
    pub async fn list_healthy(&self) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(
            "SELECT * FROM proxies WHERE status = 'healthy' ORDER BY response_time_ms ASC",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(proxies)
    }

    pub async fn list(
        &self,
        status: Option<ProxyStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(
            "SELECT * FROM proxies
             WHERE ($1::proxy_status IS NULL OR status = $1)
             ORDER BY last_checked DESC NULLS LAST
             LIMIT $2 OFFSET $3",
        )
        .bind(status)
        .bind(if limit > 0 { limit } else { 100 })
        .bind(offset.max(0))
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(proxies)
    }

    /// Counts by status for the proxy dashboard endpoint.
    pub async fn stats(&self) -> Result<Vec<(ProxyStatus, i64)>> {
        let rows: Vec<(ProxyStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM proxies GROUP BY status")
                .fetch_all(self.ctx.pool())
                .await?;
        Ok(rows)
    }

    /// Purge dead proxies, returning how many were removed.
    pub async fn purge_dead(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM proxies WHERE status = 'dead'")
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn enabled_sources(&self) -> Result<Vec<ProxySource>> {
        let sources = sqlx::query_as::<_, ProxySource>(
            "SELECT * FROM proxy_sources WHERE enabled ORDER BY id ASC",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(sources)
    }

    /// Record a fetch pass against a source.
    pub async fn record_fetch(&self, source_id: i32, count: i32) -> Result<()> {
        sqlx::query(
            "UPDATE proxy_sources SET last_fetched = NOW(), last_count = $2 WHERE id = $1",
        )
        .bind(source_id)
        .bind(count)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Ensure a source row exists for a configured URL.
    pub async fn ensure_source(&self, url: &str, kind: &str) -> Result<ProxySource> {
        let source = sqlx::query_as::<_, ProxySource>(
            "INSERT INTO proxy_sources (url, kind)
             VALUES ($1, $2)
             ON CONFLICT (url) DO UPDATE SET kind = EXCLUDED.kind
             RETURNING *",
        )
        .bind(url)
        .bind(kind)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(source)
    }
}
