//! Journal entry intake.

use axum::{extract::State, http::StatusCode, Json};

use kindred_core::{IntakeReport, NewEntry};

use crate::error::ApiResult;
use crate::state::AppState;

/// Record an entry and queue its response candidates.
/// POST /entries
pub async fn submit_entry(
    State(state): State<AppState>,
    Json(request): Json<NewEntry>,
) -> ApiResult<(StatusCode, Json<IntakeReport>)> {
    let report = state.runtime().submit_entry(request).await?;
    Ok((StatusCode::CREATED, Json(report)))
}
