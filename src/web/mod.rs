//! HTTP surface of the manager.

pub mod auth;
pub mod error;
pub mod jobs;
pub mod proxies;
pub mod routes;
pub mod stats;
pub mod workers;

pub use routes::create_router;

use std::future::IntoFuture;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::services::Service;
use crate::state::AppState;
use auth::AuthConfig;

/// Web server service.
///
/// The axum server runs on its own task so shutdown can signal the drain
/// and then wait for in-flight requests to finish.
pub struct WebService {
    port: u16,
    state: AppState,
    auth_config: AuthConfig,
    shutdown_tx: Option<broadcast::Sender<()>>,
    server_handle: Option<JoinHandle<Result<(), std::io::Error>>>,
}

impl WebService {
    pub fn new(port: u16, state: AppState, auth_config: AuthConfig) -> Self {
        Self {
            port,
            state,
            auth_config,
            shutdown_tx: None,
            server_handle: None,
        }
    }
}

#[async_trait::async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let app = create_router(self.state.clone(), self.auth_config.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(
            service = "web",
            address = %addr,
            link = format!("http://localhost:{}", addr.port()),
            "api server listening"
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            trace!(service = "web", "draining in-flight requests");
        });
        let handle = tokio::spawn(server.into_future());
        self.server_handle = Some(handle);

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            warn!(service = "web", "no shutdown channel, cannot drain gracefully");
            return Ok(());
        };
        let _ = shutdown_tx.send(());

        if let Some(handle) = self.server_handle.take() {
            handle.await??;
        }
        info!(service = "web", "api server stopped");
        Ok(())
    }
}
