use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{EnqueueResponse, LogResponse, QueueSnapshot, RunResponse};
use crate::models::queue_item::ImageSource;
use crate::routes::{api_error, ApiError};
use crate::services::queue::QueueError;

/// POST /api/v1/queue: upload one or more receipt images.
///
/// Every multipart field named `image` or `images` becomes one queue item.
/// The whole upload is rejected if any part is not a recognised image.
pub async fn enqueue_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let mut sources = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if !matches!(field.name(), Some("image" | "images")) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("upload-{}", sources.len() + 1));
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

        image::guess_format(&data).map_err(|_| {
            api_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("{file_name} is not a supported image"),
            )
        })?;

        sources.push(ImageSource::new(file_name, data.to_vec()));
    }

    if sources.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No image fields in upload"));
    }

    let item_ids = state.scheduler.enqueue(sources);
    let message = format!("{} receipt image(s) queued", item_ids.len());
    Ok((StatusCode::CREATED, Json(EnqueueResponse { item_ids, message })))
}

/// GET /api/v1/queue: items, counters and run state.
pub async fn get_queue(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.scheduler.snapshot())
}

/// DELETE /api/v1/queue/{id}: drop a pending item.
pub async fn remove_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .scheduler
        .remove(id)
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(queue_error)
}

/// DELETE /api/v1/queue: empty the queue and the log.
pub async fn clear_queue(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .scheduler
        .clear()
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(queue_error)
}

/// POST /api/v1/queue/run: start processing pending items.
pub async fn start_run(State(state): State<AppState>) -> (StatusCode, Json<RunResponse>) {
    if state.scheduler.start() {
        (
            StatusCode::ACCEPTED,
            Json(RunResponse {
                started: true,
                message: "Batch run started".to_string(),
            }),
        )
    } else {
        (
            StatusCode::OK,
            Json(RunResponse {
                started: false,
                message: "Batch run already active".to_string(),
            }),
        )
    }
}

/// GET /api/v1/queue/log: ordered progress log of the current or last run.
pub async fn get_log(State(state): State<AppState>) -> Json<LogResponse> {
    Json(LogResponse {
        active: state.scheduler.is_active(),
        entries: state.scheduler.progress().entries(),
    })
}

fn queue_error(err: QueueError) -> ApiError {
    let status = match err {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::NotPending { .. } | QueueError::RunActive => StatusCode::CONFLICT,
        QueueError::Transition(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}
