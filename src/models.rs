//! Domain models shared by the manager, the worker agent, and the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a job in the queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are sinks: nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a worker may hold this job.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// The transition table. `claim` is the only path into `Running` from
    /// `Pending`/`Queued`; `release` is the only path back to `Pending`
    /// from a held state.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        if *self == to {
            return false;
        }
        match (*self, to) {
            (Pending, Queued | Running | Failed | Cancelled) => true,
            (Queued, Pending | Running | Failed | Cancelled) => true,
            (Running, Pending | Paused | Completed | Failed | Cancelled) => true,
            (Paused, Pending | Running | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Geographic bounding box. `min_lat < max_lat`, `min_lon < max_lon`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
            && (-180.0..=180.0).contains(&self.min_lon)
            && (-180.0..=180.0).contains(&self.max_lon)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// How much of the configured area a job covers.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// One search point at the configured center.
    #[default]
    Single,
    /// Expand the bounding box into a grid of search points.
    Full,
}

/// Per-job scraping configuration, persisted as JSONB alongside the job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub keywords: Vec<String>,
    pub lang: String,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub zoom: u8,
    /// Search radius in meters around each grid point.
    pub radius: u32,
    pub depth: u8,
    pub fast_mode: bool,
    pub extract_email: bool,
    /// Overall processing budget in seconds, at least 180.
    pub max_time_seconds: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub coverage_mode: CoverageMode,
    /// Number of grid points the planner derived at creation time.
    #[serde(default = "default_grid_points")]
    pub grid_points: u32,
}

fn default_grid_points() -> u32 {
    1
}

impl JobConfig {
    /// Estimated result volume: each (keyword, grid point) seed is searched
    /// to `depth` pages of ~20 places.
    pub fn estimated_places(&self) -> i32 {
        self.keywords.len() as i32 * self.depth as i32 * 20 * self.grid_points as i32
    }
}

/// Scrape progress, authored by whichever worker holds the claim.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_places: i32,
    pub scraped_places: i32,
    pub failed_places: i32,
    pub percentage: f32,
}

impl JobProgress {
    pub fn recompute(&mut self) {
        self.percentage = if self.total_places > 0 {
            100.0 * self.scraped_places as f32 / self.total_places as f32
        } else {
            0.0
        };
    }
}

/// A scraping job as stored in `jobs_queue`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    #[sqlx(json)]
    pub config: JobConfig,
    pub total_places: i32,
    pub scraped_places: i32,
    pub failed_places: i32,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn progress(&self) -> JobProgress {
        let mut p = JobProgress {
            total_places: self.total_places,
            scraped_places: self.scraped_places,
            failed_places: self.failed_places,
            percentage: 0.0,
        };
        p.recompute();
        p
    }
}

/// Health state of a registered worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "worker_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

/// A registered worker as stored in `workers`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub jobs_completed: i32,
    pub places_scraped: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A raw result payload bound to a job. The normalized projection
/// (`business_listings` and friends) is populated by a database trigger on
/// insert; this row is the append-only source of truth.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobResult {
    pub id: i64,
    pub job_id: Uuid,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Validation state of a proxy endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "proxy_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Pending,
    Healthy,
    Dead,
    Banned,
}

/// A proxy endpoint, unique by `(ip, port)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Proxy {
    pub id: i32,
    pub ip: String,
    pub port: i32,
    pub protocol: String,
    pub country: Option<String>,
    /// Rolling uptime percentage, 0..100.
    pub uptime: f64,
    /// Rolling response time in milliseconds.
    pub response_time_ms: f64,
    pub status: ProxyStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub fail_count: i32,
    pub success_count: i32,
    pub source_id: Option<i32>,
}

/// A configured origin the proxy fetcher pulls candidate lists from.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProxySource {
    pub id: i32,
    pub url: String,
    /// `plain` for line-oriented `ip:port` lists, `html` for table sources.
    pub kind: String,
    pub enabled: bool,
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_count: i32,
}

/// Aggregate job counts by status, served by `/api/v2/stats`.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sinks() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in [
                JobStatus::Pending,
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be forbidden");
            }
        }
    }

    #[test]
    fn pending_cannot_pause_or_complete() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Paused));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn running_may_pause_and_finish() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Paused));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn paused_cannot_complete_directly() {
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn estimated_places_scales_with_seeds() {
        let config = JobConfig {
            keywords: vec!["coffee shop".into()],
            lang: "en".into(),
            geo_lat: None,
            geo_lon: None,
            zoom: 15,
            radius: 5000,
            depth: 5,
            fast_mode: false,
            extract_email: false,
            max_time_seconds: 200,
            proxies: vec![],
            location_name: None,
            bounding_box: None,
            coverage_mode: CoverageMode::Single,
            grid_points: 1,
        };
        assert_eq!(config.estimated_places(), 100);
    }

    #[test]
    fn percentage_zero_when_no_total() {
        let mut p = JobProgress::default();
        p.recompute();
        assert_eq!(p.percentage, 0.0);
        p.total_places = 200;
        p.scraped_places = 50;
        p.recompute();
        assert_eq!(p.percentage, 25.0);
    }
}
