use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub mod manager;

/// How a service's lifecycle ended.
#[derive(Debug)]
pub enum ServiceResult {
    GracefulShutdown,
    NormalCompletion,
    Error(anyhow::Error),
}

/// Common trait for the long-lived components of a process: the web server,
/// the heartbeat monitor, the proxy gateway, the worker agent.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// The name of the service for logging.
    fn name(&self) -> &'static str;

    /// Run the service's main work loop. Returning `Ok` before shutdown is
    /// treated as unexpected completion.
    async fn run(&mut self) -> Result<(), anyhow::Error>;

    /// Gracefully shut the service down.
    async fn shutdown(&mut self) -> Result<(), anyhow::Error>;
}

/// Drive one service to completion or shutdown.
pub async fn run_service(
    mut service: Box<dyn Service>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServiceResult {
    let name = service.name();
    info!(service = name, "service started");

    let work = async {
        match service.run().await {
            Ok(()) => {
                warn!(service = name, "service completed unexpectedly");
                ServiceResult::NormalCompletion
            }
            Err(e) => {
                error!(service = name, "service failed: {e}");
                ServiceResult::Error(e)
            }
        }
    };

    tokio::select! {
        result = work => result,
        _ = shutdown_rx.recv() => {
            info!(service = name, "shutting down...");
            let start_time = std::time::Instant::now();

            match service.shutdown().await {
                Ok(()) => {
                    info!(service = name, "shutdown completed in {:.2?}", start_time.elapsed());
                    ServiceResult::GracefulShutdown
                }
                Err(e) => {
                    error!(service = name, "shutdown failed after {:.2?}: {e}", start_time.elapsed());
                    ServiceResult::Error(e)
                }
            }
        }
    }
}
