//! Middleware for the REST API server.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Create CORS middleware.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Request logging middleware.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}

/// Expected bearer token for [`auth_middleware`].
#[derive(Clone)]
pub struct ApiKey(pub String);

impl ApiKey {
    /// Read `KINDRED_API_KEY`. `None` when unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("KINDRED_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self)
    }
}

/// API key authentication middleware.
///
/// Accepts `Authorization: Bearer <key>` or `Authorization: Token <key>`.
/// `/health` stays open to unauthenticated health checks.
pub async fn auth_middleware(
    State(expected): State<ApiKey>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("Token ")));

    match token {
        Some(token) if token == expected.0 => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
