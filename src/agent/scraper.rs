//! Boundary to the external place scraper.
//!
//! The browser-driven scraper is a separate system; the agent only knows
//! how to hand it a seed and take back place payloads. The remote variant
//! talks to a scraper sidecar over HTTP; the null variant exists for dry
//! runs and tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// One (keyword, grid point) search request.
#[derive(Debug, Clone, Serialize)]
pub struct Seed {
    pub keyword: String,
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
    pub radius: u32,
    pub lang: String,
    pub depth: u8,
    pub fast_mode: bool,
    pub extract_email: bool,
}

/// External scraper capability. Each returned payload is one place as a
/// JSON object; a `place_id` field drives deduplication and the normalized
/// projection.
#[async_trait]
pub trait PlaceScraper: Send + Sync {
    async fn search(&self, seed: &Seed) -> anyhow::Result<Vec<serde_json::Value>>;
}

/// Scraper sidecar over HTTP: POST the seed, receive a JSON array of
/// places.
pub struct RemoteScraper {
    http: reqwest::Client,
    url: String,
}

impl RemoteScraper {
    pub fn new(url: String, per_seed_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(per_seed_timeout)
            .build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl PlaceScraper for RemoteScraper {
    async fn search(&self, seed: &Seed) -> anyhow::Result<Vec<serde_json::Value>> {
        let resp = self.http.post(&self.url).json(seed).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("scraper answered {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

/// Scraper that finds nothing. Lets the agent run end-to-end without a
/// sidecar attached.
pub struct NullScraper;

#[async_trait]
impl PlaceScraper for NullScraper {
    async fn search(&self, _seed: &Seed) -> anyhow::Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}
