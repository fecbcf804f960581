//! Candidate validation fan-out.
//!
//! A pool of workers drains the raw candidate channel. Each candidate must
//! pass two sequential HEAD checks routed through itself: one against a
//! generic upstream, one against the scrape target. Only then is it added
//! to the live pool and promoted in the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::db::DbContext;
use crate::proxy::fetcher::Candidate;
use crate::proxy::pool::{ProxyPool, Upstream};

/// Per-check timeout; a candidate that cannot answer a HEAD in this window
/// is useless for scraping.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Validation fan-out over a shared candidate channel.
pub struct Validator {
    db: DbContext,
    pool: Arc<ProxyPool>,
    generic_url: String,
    target_url: String,
}

impl Validator {
    pub fn new(db: DbContext, pool: Arc<ProxyPool>, generic_url: String, target_url: String) -> Self {
        Self {
            db,
            pool,
            generic_url,
            target_url,
        }
    }

    /// Spawn `count` workers draining `raw_rx` until cancellation.
    pub fn spawn_workers(
        self: Arc<Self>,
        count: usize,
        raw_rx: mpsc::Receiver<Candidate>,
        cancel: &CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let raw_rx = Arc::new(Mutex::new(raw_rx));
        (0..count)
            .map(|worker_id| {
                let validator = self.clone();
                let raw_rx = raw_rx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    validator.worker_loop(worker_id, raw_rx, cancel).await;
                })
            })
            .collect()
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        raw_rx: Arc<Mutex<mpsc::Receiver<Candidate>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let candidate = {
                let mut rx = raw_rx.lock().await;
                tokio::select! {
                    candidate = rx.recv() => candidate,
                    _ = cancel.cancelled() => return,
                }
            };
            let Some(candidate) = candidate else {
                // Fetcher hung up; nothing more will arrive.
                return;
            };

            match self.validate(&candidate).await {
                Ok(elapsed_ms) => {
                    debug!(
                        worker_id,
                        proxy = format!("{}:{}", candidate.ip, candidate.port),
                        elapsed_ms,
                        "proxy validated"
                    );
                    self.pool.add_validated(Upstream {
                        ip: candidate.ip.clone(),
                        port: candidate.port,
                    });
                    if let Err(e) = self
                        .db
                        .proxies()
                        .mark_healthy(&candidate.ip, candidate.port as i32, elapsed_ms)
                        .await
                    {
                        warn!(error = ?e, "failed to persist proxy health");
                    }
                }
                Err(e) => {
                    trace!(
                        worker_id,
                        proxy = format!("{}:{}", candidate.ip, candidate.port),
                        error = %e,
                        "proxy failed validation"
                    );
                    if let Err(e) = self
                        .db
                        .proxies()
                        .mark_failure(&candidate.ip, candidate.port as i32)
                        .await
                    {
                        warn!(error = ?e, "failed to persist proxy failure");
                    }
                }
            }
        }
    }

    /// Both checks must come back `< 400` within the timeout, in order:
    /// generic first, then the target-specific upstream.
    async fn validate(&self, candidate: &Candidate) -> anyhow::Result<f64> {
        let proxy = reqwest::Proxy::all(format!("socks5://{}:{}", candidate.ip, candidate.port))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(CHECK_TIMEOUT)
            .build()?;

        let started = Instant::now();
        for url in [&self.generic_url, &self.target_url] {
            let resp = client.head(url).send().await?;
            if resp.status().as_u16() >= 400 {
                anyhow::bail!("{url} answered {}", resp.status());
            }
        }
        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }
}
