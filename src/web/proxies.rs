//! Proxy repository endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::models::ProxyStatus;
use crate::state::AppState;
use crate::web::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListProxiesParams {
    #[serde(default)]
    pub status: Option<ProxyStatus>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_proxies(
    State(state): State<AppState>,
    Query(params): Query<ListProxiesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);
    let proxies = state.db.proxies().list(params.status, limit, offset).await?;
    Ok(Json(json!({
        "items": proxies,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn proxy_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.db.proxies().stats().await?;
    let mut body = json!({
        "pending": 0,
        "healthy": 0,
        "dead": 0,
        "banned": 0,
    });
    for (status, count) in counts {
        let field = match status {
            ProxyStatus::Pending => "pending",
            ProxyStatus::Healthy => "healthy",
            ProxyStatus::Dead => "dead",
            ProxyStatus::Banned => "banned",
        };
        body[field] = json!(count);
    }
    Ok(Json(body))
}

pub async fn purge_dead(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let purged = state.db.proxies().purge_dead().await?;
    Ok((StatusCode::OK, Json(json!({ "purged": purged }))))
}
