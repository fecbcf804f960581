//! Periodic proxy source fetching.
//!
//! Pulls configured remote lists of candidate proxies, parses them, records
//! them as `pending` in the store, and feeds them to the validators through
//! a bounded channel.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::DbContext;

/// An unvalidated `ip:port` candidate on its way to the validators.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ip: String,
    pub port: u16,
    pub source_id: Option<i32>,
}

static IP_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})").unwrap());
static UPTIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());
static RESPONSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*s").unwrap());

/// Minimum uptime an HTML-table candidate must advertise.
const MIN_UPTIME_PERCENT: f64 = 70.0;
/// Maximum advertised response time in seconds.
const MAX_RESPONSE_SECS: f64 = 5.0;

/// Parse a plain-text source: one `ip:port` per line, blank lines and
/// `#` comments ignored.
pub fn parse_plain_list(text: &str) -> Vec<(String, u16)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let caps = IP_PORT.captures(line)?;
            let port: u16 = caps[2].parse().ok()?;
            Some((caps[1].to_owned(), port))
        })
        .collect()
}

/// Parse an HTML table source (proxydb.net style) heuristically, row by row,
/// keeping only candidates advertising uptime ≥ 70% and response ≤ 5 s.
pub fn parse_html_table(html: &str) -> Vec<(String, u16)> {
    html.split("<tr")
        .skip(1)
        .filter_map(|row| {
            let caps = IP_PORT.captures(row)?;
            let port: u16 = caps[2].parse().ok()?;

            let uptime: f64 = UPTIME.captures(row)?.get(1)?.as_str().parse().ok()?;
            let response: f64 = RESPONSE.captures(row)?.get(1)?.as_str().parse().ok()?;
            if uptime < MIN_UPTIME_PERCENT || response > MAX_RESPONSE_SECS {
                return None;
            }
            Some((caps[1].to_owned(), port))
        })
        .collect()
}

/// Periodic fetch loop over the enabled sources in the store.
pub struct Fetcher {
    db: DbContext,
    http: reqwest::Client,
    raw_tx: mpsc::Sender<Candidate>,
    interval: Duration,
}

impl Fetcher {
    pub fn new(db: DbContext, raw_tx: mpsc::Sender<Candidate>, interval: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            db,
            http,
            raw_tx,
            interval,
        }
    }

    /// Run until cancelled. The first pass starts immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.fetch_all(&cancel).await {
                        warn!(error = ?e, "proxy fetch pass failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn fetch_all(&self, cancel: &CancellationToken) -> crate::error::Result<()> {
        let sources = self.db.proxies().enabled_sources().await?;
        for source in sources {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let body = match self.http.get(&source.url).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(url = %source.url, error = %e, "failed to read proxy source body");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(url = %source.url, error = %e, "failed to fetch proxy source");
                    continue;
                }
            };

            let candidates = if source.kind == "html" || source.url.contains("proxydb.net") {
                parse_html_table(&body)
            } else {
                parse_plain_list(&body)
            };

            debug!(url = %source.url, count = candidates.len(), "fetched proxy candidates");
            self.db
                .proxies()
                .record_fetch(source.id, candidates.len() as i32)
                .await?;

            for (ip, port) in candidates {
                self.db
                    .proxies()
                    .upsert_candidate(&ip, port as i32, "socks5", Some(source.id))
                    .await?;
                let candidate = Candidate {
                    ip,
                    port,
                    source_id: Some(source.id),
                };
                tokio::select! {
                    sent = self.raw_tx.send(candidate) => {
                        if sent.is_err() {
                            // Validators are gone; the service is shutting down.
                            return Ok(());
                        }
                    }
                    _ = cancel.cancelled() => return Ok(()),
                }
            }
        }
        Ok(())
    }
}
