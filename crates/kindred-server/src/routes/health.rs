//! Health check endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use kindred_core::HealthReport;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: String,
}

/// Health check endpoint.
/// GET /health
///
/// 503 whenever the scheduler is not running or its ticks are overdue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.runtime().health();
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            report,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
