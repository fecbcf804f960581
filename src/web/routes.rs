//! API router assembly.

use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::auth::{self, AuthConfig};
use crate::web::{jobs, proxies, stats, workers};

/// Build the `/api/v2` router with auth, tracing, timeout, and compression
/// layers applied.
pub fn create_router(state: AppState, auth_config: AuthConfig) -> Router {
    let api = Router::new()
        .route("/health", get(stats::health))
        .route("/stats", get(stats::stats))
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(jobs::get_job)
                .patch(jobs::patch_job)
                .delete(jobs::delete_job),
        )
        .route(
            "/jobs/{id}/results",
            post(jobs::submit_results).get(jobs::list_results),
        )
        .route("/workers", get(workers::list_workers))
        .route("/workers/register", post(workers::register))
        .route("/workers/heartbeat", post(workers::heartbeat))
        .route("/workers/{id}/claim", post(workers::claim))
        .route("/workers/{id}/complete", post(workers::complete))
        .route("/workers/{id}/fail", post(workers::fail))
        .route("/workers/{id}/release", post(workers::release))
        .route("/workers/{id}", delete(workers::unregister))
        .route("/spawn", post(workers::spawn_worker))
        .route("/proxies", get(proxies::list_proxies))
        .route("/proxies/stats", get(proxies::proxy_stats))
        .route("/proxies/dead", delete(proxies::purge_dead))
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::require_bearer,
        ))
        .with_state(state);

    Router::new()
        .nest("/api/v2", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
