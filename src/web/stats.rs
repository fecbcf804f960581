//! Aggregate dashboard counters.

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use crate::cache;
use crate::models::WorkerStatus;
use crate::state::AppState;
use crate::web::error::ApiError;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if let Ok(Some(hit)) = state.cache.get("stats").await {
        return Ok(Json(hit));
    }

    let jobs = state.db.jobs().stats().await?;
    let workers = state.db.workers().list().await?;

    let mut idle = 0;
    let mut busy = 0;
    let mut offline = 0;
    for worker in &workers {
        let silent = chrono::Utc::now() - worker.last_heartbeat;
        let status = if silent.num_seconds() > state.heartbeat_timeout.as_secs() as i64 {
            WorkerStatus::Offline
        } else {
            worker.status
        };
        match status {
            WorkerStatus::Idle => idle += 1,
            WorkerStatus::Busy => busy += 1,
            WorkerStatus::Offline => offline += 1,
        }
    }

    let body = json!({
        "jobs": jobs,
        "workers": {
            "total": workers.len(),
            "idle": idle,
            "busy": busy,
            "offline": offline,
        },
        "spawner": state.spawner.as_ref().map(|s| json!({
            "substrate": s.substrate_name(),
            "active": s.active_count(),
        })),
    });
    let _ = state.cache.set("stats", body.clone(), cache::STATS_TTL).await;
    Ok(Json(body))
}
