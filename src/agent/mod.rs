//! The worker agent: registers with the manager, heartbeats, receives work
//! over the broker or by polling, and drives the scraper.

pub mod client;
pub mod runner;
pub mod scraper;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dedupe::{Deduper, MemoryDeduper, RedisDeduper};
use crate::dispatch::nats::{NatsDispatcher, NatsJobSource};
use crate::dispatch::{Delivery, JobSource};
use crate::models::WorkerStatus;
use crate::services::Service;
use client::{ClaimedJob, ManagerClient};
use runner::{JobRunner, RunOutcome};
use scraper::{NullScraper, PlaceScraper, RemoteScraper};

/// Registration retry schedule: the manager may simply not be up yet.
const REGISTER_ATTEMPTS: u32 = 5;
const REGISTER_BACKOFF: Duration = Duration::from_secs(2);

/// Durable consumer group shared by all workers.
const CONSUMER_GROUP: &str = "workers";

/// The worker agent service.
pub struct AgentService {
    client: Arc<ManagerClient>,
    runner: Arc<JobRunner>,
    configured_id: Option<String>,
    hostname: String,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    nats_url: Option<String>,
    /// Job currently held, shared between the heartbeat loop (reader) and
    /// the work loop (writer).
    current_job: Arc<RwLock<Option<Uuid>>>,
    worker_id: Arc<RwLock<Option<String>>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AgentService {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Arc::new(ManagerClient::new(
            config.manager_url.clone(),
            config.api_token.clone(),
        )?);

        let dedupe: Arc<dyn Deduper> = match &config.redis_url {
            Some(url) => Arc::new(RedisDeduper::connect(url, config.dedupe_ttl).await?),
            None => Arc::new(MemoryDeduper::new(config.dedupe_ttl)),
        };

        let place_scraper: Arc<dyn PlaceScraper> = match &config.scraper_url {
            Some(url) => Arc::new(RemoteScraper::new(url.clone(), Duration::from_secs(120))?),
            None => {
                warn!("no scraper_url configured, running with the null scraper");
                Arc::new(NullScraper)
            }
        };

        let runner = Arc::new(JobRunner::new(
            place_scraper,
            dedupe,
            config.data_dir.clone().into(),
        ));

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_owned());

        Ok(Self {
            client,
            runner,
            configured_id: config.worker_id.clone(),
            hostname,
            heartbeat_interval: config.heartbeat_interval,
            poll_interval: config.poll_interval,
            nats_url: config.nats_url.clone(),
            current_job: Arc::new(RwLock::new(None)),
            worker_id: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    async fn register_with_retry(&self) -> anyhow::Result<String> {
        let mut backoff = REGISTER_BACKOFF;
        for attempt in 1..=REGISTER_ATTEMPTS {
            match self
                .client
                .register(self.configured_id.as_deref(), &self.hostname)
                .await
            {
                Ok(id) => return Ok(id),
                Err(e) if attempt < REGISTER_ATTEMPTS => {
                    warn!(attempt, error = ?e, "registration failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("register loop always returns")
    }

    fn spawn_heartbeat_loop(&mut self, worker_id: String) {
        let client = self.client.clone();
        let hostname = self.hostname.clone();
        let current_job = self.current_job.clone();
        let interval = self.heartbeat_interval;
        let cancel = self.cancel.clone();

        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let held = *current_job.read().await;
                        let status = if held.is_some() {
                            WorkerStatus::Busy
                        } else {
                            WorkerStatus::Idle
                        };
                        if let Err(e) = client.heartbeat(&worker_id, &hostname, status, held).await {
                            warn!(error = ?e, "heartbeat send failed");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }));
    }

    async fn spawn_work_loop(&mut self, worker_id: String) -> anyhow::Result<()> {
        let work = WorkLoop {
            client: self.client.clone(),
            runner: self.runner.clone(),
            worker_id,
            current_job: self.current_job.clone(),
            poll_interval: self.poll_interval,
            cancel: self.cancel.clone(),
        };

        match self.nats_url.clone() {
            Some(url) => {
                let dispatcher = NatsDispatcher::connect(&url).await?;
                let source = NatsJobSource::open(&dispatcher, CONSUMER_GROUP).await?;
                info!(url, "consuming jobs from broker");
                self.handles.push(tokio::spawn(async move {
                    work.run_broker(source).await;
                }));
            }
            None => {
                info!(
                    interval = ?self.poll_interval,
                    "no broker configured, polling for claims"
                );
                self.handles.push(tokio::spawn(async move {
                    work.run_polling().await;
                }));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for AgentService {
    fn name(&self) -> &'static str {
        "worker-agent"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let worker_id = self.register_with_retry().await?;
        info!(worker_id, hostname = self.hostname, "worker registered");
        *self.worker_id.write().await = Some(worker_id.clone());

        self.spawn_heartbeat_loop(worker_id.clone());
        self.spawn_work_loop(worker_id).await?;

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        let _ = futures::future::join_all(self.handles.drain(..)).await;

        let Some(worker_id) = self.worker_id.read().await.clone() else {
            return Ok(());
        };

        // Best-effort cleanup: release whatever we hold, then unregister.
        if let Some(job_id) = *self.current_job.read().await {
            match self.client.release(&worker_id, job_id).await {
                Ok(()) => info!(%job_id, "released held job on shutdown"),
                Err(e) => warn!(%job_id, error = ?e, "failed to release job on shutdown"),
            }
        }
        if let Err(e) = self.client.unregister(&worker_id).await {
            warn!(error = ?e, "failed to unregister on shutdown");
        }
        Ok(())
    }
}

/// The work loop proper, shared by both dispatch modes.
struct WorkLoop {
    client: Arc<ManagerClient>,
    runner: Arc<JobRunner>,
    worker_id: String,
    current_job: Arc<RwLock<Option<Uuid>>>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl WorkLoop {
    /// Broker mode: block on deliveries, claim the named job, process, ack.
    async fn run_broker(mut self, mut source: NatsJobSource) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let delivery = tokio::select! {
                next = source.next() => next,
                _ = self.cancel.cancelled() => return,
            };
            match delivery {
                Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                Ok(None) => {
                    if self.sleep_or_cancel(self.poll_interval).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = ?e, "broker consume failed, backing off");
                    if self.sleep_or_cancel(Duration::from_secs(5)).await {
                        return;
                    }
                }
            }
        }
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        let job_id = delivery.envelope.job_id;
        match self.client.claim(&self.worker_id, Some(job_id)).await {
            Ok(Some(job)) => {
                let released = self.process(job).await;
                if released {
                    // Shutdown interrupted the job; hand the delivery back.
                    if let Err(e) = delivery.acker.nack().await {
                        warn!(%job_id, error = ?e, "failed to nack delivery");
                    }
                } else if let Err(e) = delivery.acker.ack().await {
                    warn!(%job_id, error = ?e, "failed to ack delivery");
                }
            }
            Ok(None) => {
                // Already claimed elsewhere, cancelled, or deleted.
                if let Err(e) = delivery.acker.ack().await {
                    warn!(%job_id, error = ?e, "failed to ack stale delivery");
                }
            }
            Err(e) => {
                warn!(%job_id, error = ?e, "claim failed, returning delivery");
                if let Err(e) = delivery.acker.nack().await {
                    warn!(%job_id, error = ?e, "failed to nack delivery");
                }
                let _ = self.sleep_or_cancel(Duration::from_secs(2)).await;
            }
        }
    }

    /// Polling mode: claim on an interval.
    async fn run_polling(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.client.claim(&self.worker_id, None).await {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {
                    if self.sleep_or_cancel(self.poll_interval).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = ?e, "claim poll failed, backing off");
                    if self.sleep_or_cancel(Duration::from_secs(5)).await {
                        return;
                    }
                }
            }
        }
    }

    /// Process a claimed job end to end. Returns `true` when the job was
    /// released (shutdown) rather than completed or failed.
    async fn process(&mut self, job: ClaimedJob) -> bool {
        let job_id = job.id;
        *self.current_job.write().await = Some(job_id);

        let released = match self.runner.process(job_id, &job.config, &self.cancel).await {
            Ok(RunOutcome::Completed { results, failed_seeds }) => {
                let scraped = results.len() as i64;
                match self.client.submit_results(job_id, &results).await {
                    Ok(()) => {
                        info!(%job_id, scraped, failed_seeds, "job completed");
                        if let Err(e) = self.client.complete(&self.worker_id, job_id, scraped).await
                        {
                            warn!(%job_id, error = ?e, "failed to report completion");
                        }
                    }
                    Err(e) => {
                        error!(%job_id, error = ?e, "result submission failed, marking job failed");
                        let message = format!("result submission failed: {e}");
                        if let Err(e) = self.client.fail(&self.worker_id, job_id, &message).await {
                            warn!(%job_id, error = ?e, "failed to report failure");
                        }
                    }
                }
                false
            }
            Ok(RunOutcome::Cancelled) => {
                info!(%job_id, "job interrupted by shutdown, releasing");
                if let Err(e) = self.client.release(&self.worker_id, job_id).await {
                    warn!(%job_id, error = ?e, "failed to release interrupted job");
                }
                true
            }
            Err(e) => {
                error!(%job_id, error = ?e, "job processing failed");
                if let Err(e) = self
                    .client
                    .fail(&self.worker_id, job_id, &e.to_string())
                    .await
                {
                    warn!(%job_id, error = ?e, "failed to report failure");
                }
                false
            }
        };

        *self.current_job.write().await = None;
        released
    }

    /// Sleep unless cancelled first; returns whether cancellation fired.
    async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancel.cancelled() => true,
        }
    }
}
