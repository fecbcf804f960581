use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use waypoint::models::{BoundingBox, CoverageMode, JobConfig, JobStatus, WorkerStatus};

/// Build a test job config with sensible defaults.
pub fn make_config() -> JobConfig {
    JobConfig {
        keywords: vec!["coffee shop".to_owned()],
        lang: "en".to_owned(),
        geo_lat: Some(-6.2),
        geo_lon: Some(106.8),
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
    }
}

pub fn jakarta_box() -> BoundingBox {
    BoundingBox {
        min_lat: -6.3,
        max_lat: -6.1,
        min_lon: 106.7,
        max_lon: 106.9,
    }
}

/// Insert a job row directly via SQL, returning the generated id.
///
/// `age_secs` backdates `created_at` so ordering tests can control
/// tie-breaks.
pub async fn insert_job(
    pool: &PgPool,
    name: &str,
    status: JobStatus,
    priority: i32,
    worker_id: Option<&str>,
    age_secs: i64,
) -> Uuid {
    let created_at = Utc::now() - ChronoDuration::seconds(age_secs);
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO jobs_queue (name, status, priority, config, total_places, worker_id, created_at, updated_at)
         VALUES ($1, $2, $3, $4, 100, $5, $6, $6)
         RETURNING id",
    )
    .bind(name)
    .bind(status)
    .bind(priority)
    .bind(sqlx::types::Json(make_config()))
    .bind(worker_id)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .expect("insert job");
    id
}

/// Insert a worker row, backdating `last_heartbeat` by `silent_secs`.
pub async fn insert_worker(
    pool: &PgPool,
    id: &str,
    status: WorkerStatus,
    current_job_id: Option<Uuid>,
    silent_secs: i64,
) {
    let last_heartbeat = Utc::now() - ChronoDuration::seconds(silent_secs);
    sqlx::query(
        "INSERT INTO workers (id, hostname, status, current_job_id, last_heartbeat)
         VALUES ($1, 'test-host', $2, $3, $4)",
    )
    .bind(id)
    .bind(status)
    .bind(current_job_id)
    .bind(last_heartbeat)
    .execute(pool)
    .await
    .expect("insert worker");
}
