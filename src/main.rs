use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use receipt_batch::{
    app_state::AppState,
    config::{AppConfig, SettingsHandle},
    db, routes,
    services::extractor::ExtractorRegistry,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing receipt-batch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "receipt_items_enqueued_total",
        "Receipt images added to the processing queue"
    );
    metrics::describe_counter!(
        "receipt_items_completed_total",
        "Receipt images extracted and persisted"
    );
    metrics::describe_counter!(
        "receipt_items_failed_total",
        "Receipt images that ended in the error state"
    );
    metrics::describe_counter!(
        "receipt_extraction_retries_total",
        "Extraction calls retried after a transient failure"
    );
    metrics::describe_counter!("receipt_batch_runs_total", "Batch runs started");
    metrics::describe_histogram!(
        "receipt_extraction_seconds",
        "Time spent extracting one receipt, retries included"
    );
    metrics::describe_gauge!(
        "receipt_queue_pending",
        "Current number of pending items in the queue"
    );

    // Open the local record store
    tracing::info!(database_url = %config.database_url, "Opening SQLite record store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to open database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Extraction backends
    let extractors = ExtractorRegistry::from_config(&config);
    tracing::info!(providers = ?extractors.providers(), "Extraction backends ready");

    let settings = SettingsHandle::new(config.initial_settings());
    let state = AppState::new(db_pool, settings, extractors);

    let app = routes::api_router(state, config.max_upload_bytes)
        .merge(routes::metrics_router(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting receipt-batch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
