//! Job endpoints: creation, listing, status transitions, deletion, results.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::cache;
use crate::db::{JobFilter, NewJob};
use crate::dispatch::JobEnvelope;
use crate::grid;
use crate::models::{BoundingBox, CoverageMode, Job, JobConfig, JobStatus};
use crate::state::AppState;
use crate::web::error::ApiError;

/// Wire shape of a job, with the progress block assembled.
#[derive(Debug, Serialize)]
pub struct JobDto {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub config: JobConfig,
    pub progress: ProgressDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ProgressDto {
    pub total_places: i32,
    pub scraped_places: i32,
    pub failed_places: i32,
    pub percentage: f32,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        let progress = job.progress();
        Self {
            id: job.id,
            name: job.name,
            status: job.status,
            priority: job.priority,
            config: job.config,
            progress: ProgressDto {
                total_places: progress.total_places,
                scraped_places: progress.scraped_places,
                failed_places: progress.failed_places,
                percentage: progress.percentage,
            },
            worker_id: job.worker_id,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub geo_lat: Option<f64>,
    #[serde(default)]
    pub geo_lon: Option<f64>,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default)]
    pub radius: u32,
    #[serde(default = "default_depth")]
    pub depth: u8,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub extract_email: bool,
    /// Seconds; minimum 180.
    #[serde(default = "default_max_time")]
    pub max_time: u64,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default, alias = "bounding_box")]
    pub boundingbox: Option<BoundingBox>,
    #[serde(default)]
    pub coverage_mode: CoverageMode,
}

fn default_lang() -> String {
    "en".to_owned()
}

fn default_zoom() -> u8 {
    15
}

fn default_depth() -> u8 {
    10
}

fn default_max_time() -> u64 {
    3600
}

impl CreateJobRequest {
    /// Field validation per the API contract. Rejections never touch state.
    fn validate(&self) -> Result<(), ApiError> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(ApiError::bad_request("name must be 1..255 characters"));
        }
        if self.keywords.is_empty() || self.keywords.iter().any(String::is_empty) {
            return Err(ApiError::bad_request(
                "keywords must contain at least one non-empty entry",
            ));
        }
        if self.lang.len() != 2 {
            return Err(ApiError::bad_request("lang must be a 2-letter code"));
        }
        if let Some(lat) = self.geo_lat
            && !(-90.0..=90.0).contains(&lat)
        {
            return Err(ApiError::bad_request("geo_lat out of range"));
        }
        if let Some(lon) = self.geo_lon
            && !(-180.0..=180.0).contains(&lon)
        {
            return Err(ApiError::bad_request("geo_lon out of range"));
        }
        if !(1..=21).contains(&self.zoom) {
            return Err(ApiError::bad_request("zoom must be 1..21"));
        }
        if !(1..=100).contains(&self.depth) {
            return Err(ApiError::bad_request("depth must be 1..100"));
        }
        if self.max_time < 180 {
            return Err(ApiError::bad_request("max_time must be at least 180 seconds"));
        }
        if !(0..=100).contains(&self.priority) {
            return Err(ApiError::bad_request("priority must be 0..100"));
        }
        if let Some(bbox) = &self.boundingbox
            && !bbox.is_valid()
        {
            return Err(ApiError::bad_request(
                "boundingbox must satisfy min < max within valid geo ranges",
            ));
        }
        Ok(())
    }

    fn into_new_job(self) -> NewJob {
        let center = match (self.geo_lat, self.geo_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };
        let grid_points = grid::plan(
            self.boundingbox.as_ref(),
            center,
            self.radius,
            self.coverage_mode == CoverageMode::Full,
        )
        .len() as u32;

        NewJob {
            name: self.name,
            priority: self.priority,
            config: JobConfig {
                keywords: self.keywords,
                lang: self.lang,
                geo_lat: self.geo_lat,
                geo_lon: self.geo_lon,
                zoom: self.zoom,
                radius: self.radius,
                depth: self.depth,
                fast_mode: self.fast_mode,
                extract_email: self.extract_email,
                max_time_seconds: self.max_time,
                proxies: self.proxies,
                location_name: self.location_name,
                bounding_box: self.boundingbox,
                coverage_mode: self.coverage_mode,
                grid_points,
            },
        }
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobDto>), ApiError> {
    request.validate()?;
    let mut job = state.db.jobs().create(request.into_new_job()).await?;

    let envelope = JobEnvelope {
        job_id: job.id,
        priority: job.priority,
        created_at: job.created_at,
    };
    match state.publisher.publish(&envelope).await {
        // Queued strictly means "handed to the broker". The polling
        // profile publishes nothing, and a failed publish publishes
        // nothing; both leave the job pending so claim polls find it.
        Ok(true) => {
            match state.db.jobs().update_status(job.id, JobStatus::Queued).await {
                Ok(updated) => job = updated,
                Err(e) => warn!(job_id = %job.id, error = ?e, "failed to mark job queued"),
            }
        }
        Ok(false) => {}
        Err(e) => {
            warn!(job_id = %job.id, error = ?e, "job notification publish failed, job stays pending");
        }
    }

    purge_job_caches(&state).await;
    Ok((StatusCode::CREATED, Json(job.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);
    let status_key = params.status.map_or("any".to_owned(), |s| s.to_string());
    let key = format!("jobs:list:{status_key}:{limit}:{offset}");

    if let Ok(Some(hit)) = state.cache.get(&key).await {
        return Ok(Json(hit));
    }

    let jobs = state
        .db
        .jobs()
        .list(&JobFilter {
            status: params.status,
            limit,
            offset,
            ..Default::default()
        })
        .await?;

    let page = json!({
        "items": jobs.into_iter().map(JobDto::from).collect::<Vec<_>>(),
        "limit": limit,
        "offset": offset,
    });
    let _ = state.cache.set(&key, page.clone(), cache::JOBS_LIST_TTL).await;
    Ok(Json(page))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = format!("jobs:detail:{id}");
    if let Ok(Some(hit)) = state.cache.get(&key).await {
        return Ok(Json(hit));
    }

    let job = state.db.jobs().get(id).await?;
    let body = serde_json::to_value(JobDto::from(job))
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let _ = state.cache.set(&key, body.clone(), cache::DETAIL_TTL).await;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct PatchJobRequest {
    pub status: JobStatus,
}

pub async fn patch_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PatchJobRequest>,
) -> Result<Json<JobDto>, ApiError> {
    let job = state.db.jobs().update_status(id, request.status).await?;
    purge_job_caches(&state).await;
    Ok(Json(job.into()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.db.jobs().delete(id).await?;
    purge_job_caches(&state).await;
    let _ = state
        .cache
        .delete_by_pattern(&format!("results:{id}:*"))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /jobs/{id}/results`: payloads either as base64
/// strings of JSON bytes or as inline JSON objects.
#[derive(Debug, Deserialize)]
pub struct SubmitResultsRequest {
    pub data: Vec<serde_json::Value>,
}

pub async fn submit_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitResultsRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    // 404 before accepting payloads for a job that never existed.
    state.db.jobs().get(id).await?;

    let mut payloads = Vec::with_capacity(request.data.len());
    for entry in request.data {
        match entry {
            serde_json::Value::String(encoded) => {
                let bytes = BASE64
                    .decode(&encoded)
                    .map_err(|_| ApiError::bad_request("data entries must be base64"))?;
                let value = serde_json::from_slice(&bytes)
                    .map_err(|_| ApiError::bad_request("decoded payload is not valid JSON"))?;
                payloads.push(value);
            }
            value @ serde_json::Value::Object(_) => payloads.push(value),
            _ => return Err(ApiError::bad_request("data entries must be base64 or objects")),
        }
    }

    let inserted = state.db.results().create_batch(id, &payloads).await?;
    let _ = state
        .cache
        .delete_by_pattern(&format!("results:{id}:*"))
        .await;
    Ok((StatusCode::CREATED, Json(json!({ "inserted": inserted }))))
}

#[derive(Debug, Deserialize)]
pub struct ListResultsParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ListResultsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);
    let key = format!("results:{id}:{limit}:{offset}");

    if let Ok(Some(hit)) = state.cache.get(&key).await {
        return Ok(Json(hit));
    }

    let total = state.db.results().count_by_job(id).await?;
    let results = state.db.results().list_by_job(id, limit, offset).await?;
    let page = json!({
        "items": results.into_iter().map(|r| r.data).collect::<Vec<_>>(),
        "total": total,
        "limit": limit,
        "offset": offset,
    });
    let _ = state
        .cache
        .set(&key, page.clone(), cache::RESULTS_LIST_TTL)
        .await;
    Ok(Json(page))
}

/// Job writes invalidate the job family and the stats snapshot; nothing
/// else.
pub(crate) async fn purge_job_caches(state: &AppState) {
    let _ = state.cache.delete_by_pattern("jobs:*").await;
    let _ = state.cache.delete("stats").await;
}
