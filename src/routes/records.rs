use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::record::ReceiptRecord;
use crate::routes::{api_error, ApiError};

/// GET /api/v1/records: every persisted receipt record.
pub async fn list_records(State(state): State<AppState>) -> Result<Json<Vec<ReceiptRecord>>, ApiError> {
    let records = state.scheduler.records().list_all().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list records");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(records))
}

/// GET /api/v1/records/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReceiptRecord>, ApiError> {
    match state.scheduler.records().get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Record {id} not found"))),
        Err(e) => {
            tracing::error!(record_id = %id, error = %e, "Failed to load record");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
