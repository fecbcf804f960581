//! Crate-wide error type and result alias.

use crate::models::JobStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Domain errors surfaced by the store, dispatcher, and gateway layers.
///
/// API handlers map these onto HTTP statuses in `web::error`; background
/// loops log the non-fatal ones and keep running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input rejected before it touched any state.
    #[error("validation: {0}")]
    Validation(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// A status change the transition table forbids.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Write attempted against a completed/failed/cancelled job.
    #[error("job is in terminal state {0}")]
    Terminal(JobStatus),

    /// The spawner is at its concurrency cap. Callers treat this as a
    /// skip, not a failure.
    #[error("max workers reached")]
    ResourceExhausted,

    #[error("proxy pool is empty")]
    PoolEmpty,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("broker: {0}")]
    Broker(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn broker(err: impl std::fmt::Display) -> Self {
        Self::Broker(err.to_string())
    }
}
