//! On-demand worker spawning across substrates.
//!
//! The [`Spawner`] owns the concurrency cap and the tracking table; the
//! [`Substrate`] capability does the actual creation. A reservation slot is
//! taken under the lock *before* anything is created, so concurrent spawn
//! calls can never over-admit past `max_workers`. For fire-and-forget
//! function invocations the slot is only returned when the caller signals
//! completion, never at submit time.

pub mod docker;
pub mod function;
pub mod kube;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;

/// What a spawned worker needs to know to join the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub priority: i32,
    pub manager_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

/// Observable state of a spawned instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnStatus {
    Running,
    Skipped,
    Failed,
    Stopped,
    Unknown,
}

/// Outcome of a spawn call.
#[derive(Debug, Clone, Serialize)]
pub struct SpawnResult {
    pub status: SpawnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpawnResult {
    fn skipped() -> Self {
        Self {
            status: SpawnStatus::Skipped,
            instance_id: None,
            error: Some("max workers".to_owned()),
        }
    }
}

/// A place workers can be created: local containers, cluster jobs, or a
/// function endpoint.
#[async_trait::async_trait]
pub trait Substrate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create and start an instance, returning the substrate-level id.
    async fn create(&self, instance: &str, request: &SpawnRequest) -> anyhow::Result<String>;

    async fn status(&self, instance: &str) -> anyhow::Result<SpawnStatus>;

    async fn stop(&self, instance: &str) -> anyhow::Result<()>;

    /// Release any held connections.
    async fn close(&self) -> anyhow::Result<()>;
}

enum Tracked {
    /// Slot held while the substrate call is in flight.
    Reserved,
    /// Live instance with its substrate id.
    Active(String),
}

/// Cap-enforcing front over a substrate.
pub struct Spawner {
    substrate: Box<dyn Substrate>,
    max_workers: usize,
    tracked: Mutex<HashMap<String, Tracked>>,
    active: AtomicUsize,
}

impl Spawner {
    pub fn new(substrate: Box<dyn Substrate>, max_workers: usize) -> Self {
        Self {
            substrate,
            max_workers,
            tracked: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    /// Build the configured substrate, or `None` when spawning is disabled.
    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        let substrate: Box<dyn Substrate> = match config.spawner_kind.as_str() {
            "docker" => Box::new(docker::DockerSubstrate::connect(config.worker_image.clone())?),
            "kube" => Box::new(kube::KubeSubstrate::new(
                config.kube_namespace.clone(),
                config.worker_image.clone(),
            )),
            "function" => {
                let url = config.function_url.clone().ok_or_else(|| {
                    anyhow::anyhow!("spawner_kind=function requires function_url")
                })?;
                Box::new(function::FunctionSubstrate::new(url, config.function_async))
            }
            "none" => return Ok(None),
            other => anyhow::bail!("unknown spawner kind '{other}'"),
        };
        Ok(Some(Self::new(substrate, config.max_workers)))
    }

    pub fn substrate_name(&self) -> &'static str {
        self.substrate.name()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn one worker instance, respecting the concurrency cap.
    ///
    /// At the cap, returns `skipped` without reserving. Otherwise the slot
    /// is reserved under the lock first, then the substrate call runs
    /// outside it; failure returns the slot.
    pub async fn spawn(&self, request: SpawnRequest) -> SpawnResult {
        let instance = format!(
            "waypoint-worker-{}",
            &Uuid::new_v4().simple().to_string()[..8]
        );

        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            if self.active.load(Ordering::SeqCst) >= self.max_workers {
                return SpawnResult::skipped();
            }
            self.active.fetch_add(1, Ordering::SeqCst);
            tracked.insert(instance.clone(), Tracked::Reserved);
        }

        match self.substrate.create(&instance, &request).await {
            Ok(substrate_id) => {
                info!(
                    instance,
                    substrate = self.substrate.name(),
                    substrate_id,
                    "spawned worker instance"
                );
                self.tracked
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(instance.clone(), Tracked::Active(substrate_id));
                SpawnResult {
                    status: SpawnStatus::Running,
                    instance_id: Some(instance),
                    error: None,
                }
            }
            Err(e) => {
                warn!(instance, error = ?e, "worker spawn failed, releasing reservation");
                self.forget(&instance);
                SpawnResult {
                    status: SpawnStatus::Failed,
                    instance_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn status(&self, instance: &str) -> anyhow::Result<SpawnStatus> {
        if !self
            .tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(instance)
        {
            return Ok(SpawnStatus::Unknown);
        }
        self.substrate.status(instance).await
    }

    /// Stop and untrack an instance.
    pub async fn stop(&self, instance: &str) -> anyhow::Result<()> {
        self.substrate.stop(instance).await?;
        self.forget(instance);
        Ok(())
    }

    /// Caller-side completion signal: the async-invocation path where the
    /// instance exits on its own and nobody calls `stop`. Also covers
    /// failed/cancelled instances.
    pub fn signal_done(&self, instance: &str) {
        self.forget(instance);
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.substrate.close().await
    }

    fn forget(&self, instance: &str) {
        let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        if tracked.remove(instance).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
