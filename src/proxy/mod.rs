//! The proxy gateway: source fetching, validation fan-out, and the local
//! SOCKS5 endpoint, run as one service under a shared cancellation token.

pub mod fetcher;
pub mod gateway;
pub mod pool;
pub mod socks5;
pub mod validator;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::db::DbContext;
use crate::services::Service;
use fetcher::Fetcher;
use gateway::Gateway;
use pool::ProxyPool;
use validator::Validator;

/// Buffered candidates between the fetcher and the validators.
const RAW_CHANNEL_CAPACITY: usize = 1024;

/// Service wrapper tying the three gateway sub-tasks together.
pub struct GatewayService {
    db: DbContext,
    config: ProxyConfig,
    pool: Arc<ProxyPool>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl GatewayService {
    pub fn new(db: DbContext, config: ProxyConfig) -> Self {
        Self {
            db,
            config,
            pool: Arc::new(ProxyPool::new()),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Shared handle to the live pool, e.g. for the stats endpoint.
    pub fn pool(&self) -> Arc<ProxyPool> {
        self.pool.clone()
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        // Seed source rows for the configured URLs so the fetcher picks
        // them up alongside anything added out-of-band.
        for url in &self.config.sources {
            let kind = if url.contains("proxydb.net") { "html" } else { "plain" };
            self.db.proxies().ensure_source(url, kind).await?;
        }

        match self.pool.load_from_store(&self.db.proxies()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "loaded healthy proxies from store"),
            Err(e) => warn!(error = ?e, "failed to preload proxy pool"),
        }

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);

        let fetcher = Fetcher::new(self.db.clone(), raw_tx, self.config.refresh_interval);
        let fetch_cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            fetcher.run(fetch_cancel).await;
        }));

        let validator = Arc::new(Validator::new(
            self.db.clone(),
            self.pool.clone(),
            self.config.check_url.clone(),
            self.config.target_check_url.clone(),
        ));
        self.handles.extend(validator.spawn_workers(
            self.config.validator_workers,
            raw_rx,
            &self.cancel,
        ));

        let gateway = Gateway::new(self.db.clone(), self.pool.clone(), self.config.listen_addr.clone());
        let gateway_cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = gateway.run(gateway_cancel).await {
                warn!(error = ?e, "gateway listener exited with error");
            }
        }));

        info!(
            listen_addr = %self.config.listen_addr,
            validator_workers = self.config.validator_workers,
            sources = self.config.sources.len(),
            "proxy gateway started"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for GatewayService {
    fn name(&self) -> &'static str {
        "proxy-gateway"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await?;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        let results = futures::future::join_all(self.handles.drain(..)).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed_count = failed, "some gateway tasks panicked during shutdown");
            return Err(anyhow::anyhow!("{failed} task(s) panicked"));
        }
        Ok(())
    }
}
