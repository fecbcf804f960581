//! Job processing: seed expansion, the time budget, scraping with dedup,
//! and the local results file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::scraper::{PlaceScraper, Seed};
use crate::dedupe::Deduper;
use crate::grid;
use crate::models::{CoverageMode, JobConfig};

/// What processing a job produced.
pub enum RunOutcome {
    /// Budget ran out or every seed was visited; results are ready to
    /// submit.
    Completed {
        results: Vec<serde_json::Value>,
        failed_seeds: i64,
    },
    /// Shutdown interrupted the job; the caller should release it.
    Cancelled,
}

/// Expand a job config into its (keyword × grid point) seed list.
pub fn seeds_for(config: &JobConfig) -> Vec<Seed> {
    let center = match (config.geo_lat, config.geo_lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    };
    let points = grid::plan(
        config.bounding_box.as_ref(),
        center,
        config.radius,
        config.coverage_mode == CoverageMode::Full,
    );

    let mut seeds = Vec::with_capacity(config.keywords.len() * points.len());
    for keyword in &config.keywords {
        for point in &points {
            seeds.push(Seed {
                keyword: keyword.clone(),
                lat: point.lat,
                lon: point.lon,
                zoom: config.zoom,
                radius: config.radius,
                lang: config.lang.clone(),
                depth: config.depth,
                fast_mode: config.fast_mode,
                extract_email: config.extract_email,
            });
        }
    }
    seeds
}

/// Overall processing budget: the configured `max_time` floored at 180
/// seconds, or a seed-count estimate when unset.
pub fn time_budget(config: &JobConfig, seed_count: usize) -> Duration {
    if config.max_time_seconds > 0 {
        return Duration::from_secs(config.max_time_seconds.max(180));
    }
    let estimate = seed_count as u64 * 10 * config.depth as u64 / 50 + 120;
    Duration::from_secs(estimate.max(60))
}

/// Dedupe key for a scraped place: the stable external id when present,
/// the canonical URL otherwise, the whole payload as a last resort.
fn dedupe_key(place: &serde_json::Value) -> String {
    if let Some(place_id) = place.get("place_id").and_then(|v| v.as_str())
        && !place_id.is_empty()
    {
        return place_id.to_owned();
    }
    if let Some(url) = place.get("url").and_then(|v| v.as_str())
        && !url.is_empty()
    {
        return url.to_owned();
    }
    place.to_string()
}

/// Drives the scraper over a job's seeds.
pub struct JobRunner {
    scraper: Arc<dyn PlaceScraper>,
    dedupe: Arc<dyn Deduper>,
    data_dir: PathBuf,
}

impl JobRunner {
    pub fn new(scraper: Arc<dyn PlaceScraper>, dedupe: Arc<dyn Deduper>, data_dir: PathBuf) -> Self {
        Self {
            scraper,
            dedupe,
            data_dir,
        }
    }

    /// Process one job within its time budget.
    ///
    /// Results accumulate in memory for the final batch submit while each
    /// accepted place is also appended to a local JSONL file, so a crash
    /// before submit leaves something to recover from.
    pub async fn process(
        &self,
        job_id: Uuid,
        config: &JobConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        let seeds = seeds_for(config);
        let budget = time_budget(config, seeds.len());
        let deadline = Instant::now() + budget;

        info!(
            %job_id,
            seeds = seeds.len(),
            budget_secs = budget.as_secs(),
            "processing job"
        );

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.data_dir.join(format!("{job_id}.jsonl"));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut results: Vec<serde_json::Value> = Vec::new();
        let mut failed_seeds = 0i64;

        for seed in &seeds {
            if cancel.is_cancelled() {
                file.flush().await?;
                return Ok(RunOutcome::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(%job_id, "time budget exhausted, dropping remaining seeds");
                break;
            }

            let search = tokio::time::timeout(remaining, self.scraper.search(seed));
            let places = tokio::select! {
                outcome = search => match outcome {
                    Ok(Ok(places)) => places,
                    Ok(Err(e)) => {
                        warn!(%job_id, keyword = seed.keyword, error = %e, "seed search failed");
                        failed_seeds += 1;
                        continue;
                    }
                    Err(_) => {
                        warn!(%job_id, "time budget exhausted mid-seed");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Ok(RunOutcome::Cancelled);
                }
            };

            for place in places {
                let key = dedupe_key(&place);
                if !self.dedupe.add_if_absent(&key).await? {
                    continue;
                }
                let mut line = serde_json::to_vec(&place)?;
                line.push(b'\n');
                file.write_all(&line).await?;
                results.push(place);
            }
        }

        file.flush().await?;
        debug!(%job_id, collected = results.len(), failed_seeds, "job processing finished");
        Ok(RunOutcome::Completed {
            results,
            failed_seeds,
        })
    }
}
