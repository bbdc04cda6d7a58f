//! Per-user endpoints: tier settings, engagement, emission history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kindred_core::{EmissionRecord, InteractionLevel, Tier, UserSettings};

use crate::error::ApiResult;
use crate::state::AppState;

/// Request body for updating tier settings.
#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub interaction_level: InteractionLevel,
}

/// PUT /users/:user_id/settings
pub async fn save_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<Json<UserSettings>> {
    let settings = UserSettings::new(user_id, request.tier, request.interaction_level);
    state.runtime().save_user_settings(&settings).await?;
    Ok(Json(settings))
}

/// Request body for recording engagement.
#[derive(Debug, Default, Deserialize)]
pub struct EngagementRequest {
    /// Defaults to now.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// The user reacted to or replied to an AI response.
/// POST /users/:user_id/engagement
pub async fn record_engagement(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Option<Json<EngagementRequest>>,
) -> ApiResult<StatusCode> {
    let at = request.and_then(|Json(r)| r.at);
    state.runtime().record_engagement(&user_id, at).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct EmissionsResponse {
    pub emissions: Vec<EmissionRecord>,
    pub total: usize,
}

/// GET /users/:user_id/emissions
pub async fn list_emissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<EmissionsResponse>> {
    let emissions = state.runtime().list_emissions(&user_id).await?;
    Ok(Json(EmissionsResponse {
        total: emissions.len(),
        emissions,
    }))
}
