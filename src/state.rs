//! Shared application state for the manager's handlers and services.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::db::DbContext;
use crate::dispatch::JobPublisher;
use crate::spawner::Spawner;

#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub cache: Arc<dyn Cache>,
    pub publisher: Arc<dyn JobPublisher>,
    pub spawner: Option<Arc<Spawner>>,
    /// Silence threshold used when deriving `offline` in worker listings.
    pub heartbeat_timeout: Duration,
    /// Manager URL injected into spawned workers.
    pub manager_url: String,
    /// Broker URL injected into spawned workers, when the broker profile is
    /// active.
    pub broker_url: Option<String>,
}
