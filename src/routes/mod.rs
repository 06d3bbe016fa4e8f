use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::app_state::AppState;
use crate::models::api::ErrorResponse;

pub mod health;
pub mod queue;
pub mod records;
pub mod settings;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Health and `/api/v1` routes.
pub fn api_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/queue",
            get(queue::get_queue)
                .post(queue::enqueue_images)
                .delete(queue::clear_queue),
        )
        .route("/api/v1/queue/run", post(queue::start_run))
        .route("/api/v1/queue/log", get(queue::get_log))
        .route("/api/v1/queue/{id}", delete(queue::remove_item))
        .route("/api/v1/records", get(records::list_records))
        .route("/api/v1/records/{id}", get(records::get_record))
        .route(
            "/api/v1/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Prometheus scrape endpoint in text exposition format.
pub fn metrics_router(handle: Arc<PrometheusHandle>) -> Router {
    Router::new().route(
        "/metrics",
        get(|axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>| async move {
            handle.render()
        })
        .with_state(handle),
    )
}
