//! Bearer-token authentication middleware.
//!
//! When no token is configured the API runs open; the manager logs a
//! warning at startup so that state is never silent.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::web::error::ApiError;

/// Shared auth configuration.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

/// Reject requests whose `Authorization: Bearer` token doesn't match the
/// configured one. No-op when unconfigured.
pub async fn require_bearer(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &auth.token else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => Err(ApiError::unauthorized("invalid API token")),
        None => Err(ApiError::unauthorized("missing bearer token")),
    }
}
