use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::config::ProcessingSettings;
use crate::routes::{api_error, ApiError};

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<ProcessingSettings> {
    Json(state.scheduler.settings().current())
}

/// PUT /api/v1/settings: takes effect when the next run starts.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<ProcessingSettings>,
) -> Result<Json<ProcessingSettings>, ApiError> {
    state
        .scheduler
        .settings()
        .update(settings)
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(Json(state.scheduler.settings().current()))
}
