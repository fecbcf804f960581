//! Database context and domain operations.

mod jobs;
mod proxies;
mod results;
mod workers;

pub use jobs::{JobFilter, JobOps, NewJob};
pub use proxies::ProxyOps;
pub use results::ResultOps;
pub use workers::WorkerOps;

use sqlx::PgPool;

/// Database context shared by the manager's services and handlers.
///
/// Domain operations hang off this so call sites read
/// `ctx.jobs().claim(..)` instead of threading a pool around.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations in lexical order, recording applied versions.
    pub async fn migrate(&self) -> crate::error::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn jobs(&self) -> JobOps<'_> {
        JobOps::new(self)
    }

    pub fn workers(&self) -> WorkerOps<'_> {
        WorkerOps::new(self)
    }

    pub fn results(&self) -> ResultOps<'_> {
        ResultOps::new(self)
    }

    pub fn proxies(&self) -> ProxyOps<'_> {
        ProxyOps::new(self)
    }
}
