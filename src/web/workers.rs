//! Worker fleet endpoints: registration, heartbeats, the claim protocol,
//! completion reporting, and on-demand spawning.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::models::{Worker, WorkerStatus};
use crate::spawner::{SpawnRequest, SpawnResult};
use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::jobs::{JobDto, purge_job_caches};

#[derive(Debug, Serialize)]
pub struct WorkerDto {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<Uuid>,
    pub jobs_completed: i32,
    pub places_scraped: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WorkerDto {
    /// Derive `offline` from heartbeat age at read time; the monitor will
    /// persist it on its next sweep.
    fn derive(worker: Worker, timeout: std::time::Duration) -> Self {
        let silent = Utc::now() - worker.last_heartbeat;
        let status = if silent.num_seconds() > timeout.as_secs() as i64 {
            WorkerStatus::Offline
        } else {
            worker.status
        };
        Self {
            id: worker.id,
            hostname: worker.hostname,
            status,
            current_job_id: worker.current_job_id,
            jobs_completed: worker.jobs_completed,
            places_scraped: worker.places_scraped,
            last_heartbeat: worker.last_heartbeat,
            created_at: worker.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<WorkerDto>), ApiError> {
    if let Some(id) = &request.worker_id
        && (id.is_empty() || id.len() > 128)
    {
        return Err(ApiError::bad_request("worker_id must be 1..128 characters"));
    }
    let worker = state
        .db
        .workers()
        .register(request.worker_id, request.hostname.as_deref().unwrap_or(""))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(WorkerDto::derive(worker, state.heartbeat_timeout)),
    ))
}

pub async fn list_workers(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workers = state.db.workers().list().await?;
    let items: Vec<_> = workers
        .into_iter()
        .map(|w| WorkerDto::derive(w, state.heartbeat_timeout))
        .collect();
    Ok(Json(json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default)]
    pub hostname: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub current_job_id: Option<Uuid>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .workers()
        .heartbeat(
            &request.worker_id,
            &request.hostname,
            request.status,
            request.current_job_id,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Claim body. Broker-driven workers name the job their delivery carried;
/// polling workers send an empty body and take the best available.
#[derive(Debug, Default, Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

pub async fn claim(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claimed = match request.job_id {
        Some(job_id) => state.db.jobs().claim_specific(job_id, &worker_id).await?,
        None => state.db.jobs().claim(&worker_id).await?,
    };

    if claimed.is_some() {
        purge_job_caches(&state).await;
    }
    Ok(Json(json!({ "job": claimed.map(JobDto::from) })))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub places_scraped: i64,
}

pub async fn complete(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .jobs()
        .complete(request.job_id, &worker_id, request.places_scraped)
        .await?;
    purge_job_caches(&state).await;

    if let Some(spawner) = &state.spawner {
        spawner.signal_done(&worker_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub job_id: Uuid,
    pub message: String,
}

pub async fn fail(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<StatusCode, ApiError> {
    state.db.jobs().fail(request.job_id, &request.message).await?;
    purge_job_caches(&state).await;

    if let Some(spawner) = &state.spawner {
        spawner.signal_done(&worker_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub job_id: Uuid,
}

pub async fn release(
    State(state): State<AppState>,
    Path(_worker_id): Path<String>,
    Json(request): Json<ReleaseRequest>,
) -> Result<StatusCode, ApiError> {
    state.db.jobs().release(request.job_id).await?;
    purge_job_caches(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unregister(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    // Release whatever the worker still holds before dropping the row.
    match state.db.workers().get(&worker_id).await {
        Ok(worker) => {
            if let Some(job_id) = worker.current_job_id
                && let Err(e) = state.db.jobs().release(job_id).await
                && !matches!(e, Error::Terminal(_))
            {
                warn!(worker_id, job_id = %job_id, error = ?e, "failed to release job during unregister");
            }
        }
        Err(Error::NotFound { .. }) => return Err(Error::NotFound { entity: "worker" }.into()),
        Err(e) => return Err(e.into()),
    }

    state.db.workers().delete(&worker_id).await?;
    purge_job_caches(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Ops endpoint: ask the spawner for one more worker instance.
#[derive(Debug, Deserialize)]
pub struct SpawnApiRequest {
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_spawn_concurrency")]
    pub concurrency: u32,
}

fn default_spawn_concurrency() -> u32 {
    1
}

pub async fn spawn_worker(
    State(state): State<AppState>,
    Json(request): Json<SpawnApiRequest>,
) -> Result<Json<SpawnResult>, ApiError> {
    let Some(spawner) = &state.spawner else {
        return Err(ApiError::bad_request("no spawner configured"));
    };

    let result = spawner
        .spawn(SpawnRequest {
            job_id: request.job_id,
            priority: request.priority,
            manager_url: state.manager_url.clone(),
            broker_url: state.broker_url.clone(),
            concurrency: request.concurrency,
        })
        .await;
    Ok(Json(result))
}
