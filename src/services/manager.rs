//! Service lifecycle management: spawn everything, wait for the first exit
//! or a signal, then fan out shutdown with a deadline.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::{Service, ServiceResult, run_service};

/// Owns every registered service and the shared shutdown channel.
pub struct ServiceManager {
    registered: HashMap<String, Box<dyn Service>>,
    running: HashMap<String, JoinHandle<ServiceResult>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered: HashMap::new(),
            running: HashMap::new(),
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned).
    pub fn register(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered.insert(name.to_owned(), service);
    }

    /// Spawn all registered services onto the runtime.
    pub fn spawn_all(&mut self) {
        let names: Vec<_> = self.registered.keys().cloned().collect();
        for (name, service) in self.registered.drain() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.running
                .insert(name, tokio::spawn(run_service(service, shutdown_rx)));
        }
        info!(services = ?names, "spawned {} services", names.len());
    }

    /// Wait until any service completes or fails, returning its name and
    /// result. The remaining services keep running; the caller decides
    /// whether to shut them down.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        if self.running.is_empty() {
            return (
                "none".to_owned(),
                ServiceResult::Error(anyhow::anyhow!("no services to run")),
            );
        }

        loop {
            let finished: Option<String> = self
                .running
                .iter()
                .find(|(_, handle)| handle.is_finished())
                .map(|(name, _)| name.clone());

            if let Some(name) = finished {
                let handle = self.running.remove(&name).expect("service exists");
                return match handle.await {
                    Ok(result) => (name, result),
                    Err(e) => {
                        error!(service = name, "service task panicked: {e}");
                        (name, ServiceResult::Error(anyhow::anyhow!("task panic: {e}")))
                    }
                };
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Broadcast shutdown and wait for every service, bounded by `timeout`.
    ///
    /// Returns the elapsed time on success, or the names of the services
    /// that did not finish in time.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let names: Vec<_> = self.running.keys().cloned().collect();
        info!(
            services = ?names,
            timeout = format!("{timeout:.2?}"),
            "shutting down {} services",
            names.len()
        );

        let _ = self.shutdown_tx.send(());

        let start = std::time::Instant::now();
        let mut pending = Vec::new();
        for (name, handle) in self.running.drain() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(_)) => debug!(service = name, "service shutdown completed"),
                Ok(Err(e)) => {
                    warn!(service = name, error = ?e, "service shutdown failed");
                    pending.push(name);
                }
                Err(_) => {
                    warn!(service = name, "service shutdown timed out");
                    pending.push(name);
                }
            }
        }

        let elapsed = start.elapsed();
        if pending.is_empty() {
            info!(elapsed = format!("{elapsed:.2?}"), "all services shut down");
            Ok(elapsed)
        } else {
            warn!(
                pending = ?pending,
                elapsed = format!("{elapsed:.2?}"),
                "{} service(s) did not complete shutdown",
                pending.len()
            );
            Err(pending)
        }
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}
