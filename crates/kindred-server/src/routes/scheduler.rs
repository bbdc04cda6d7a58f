//! Scheduler lifecycle endpoints.

use axum::{extract::State, Json};

use kindred_core::{SchedulerStatus, TickReport};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /scheduler/status
pub async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.runtime().status())
}

/// POST /scheduler/start
pub async fn start(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    state.runtime().start().await?;
    Ok(Json(state.runtime().status()))
}

/// POST /scheduler/stop
pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    state.runtime().stop().await?;
    Ok(Json(state.runtime().status()))
}

/// Run one tick immediately.
/// POST /scheduler/trigger
pub async fn trigger(State(state): State<AppState>) -> ApiResult<Json<TickReport>> {
    let report = state.runtime().trigger_cycle_now().await?;
    Ok(Json(report))
}
