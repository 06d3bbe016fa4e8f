use receipt_batch::{
    app_state::AppState,
    config::{AppConfig, SettingsHandle},
    db,
    models::queue_item::ImageSource,
    services::{extractor::ExtractorRegistry, scheduler::RunOutcome},
};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Extract every receipt image given on the command line, then exit.
#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: receipt-batch-run <image>...");
        return ExitCode::from(2);
    }

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!(database_url = %config.database_url, "Opening SQLite record store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let extractors = ExtractorRegistry::from_config(&config);
    let state = AppState::new(
        db_pool,
        SettingsHandle::new(config.initial_settings()),
        extractors,
    );

    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        match std::fs::read(path) {
            Ok(bytes) => {
                let file_name = Path::new(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone());
                sources.push(ImageSource::new(file_name, bytes));
            }
            Err(e) => tracing::error!(path = %path, error = %e, "Could not read image, skipping"),
        }
    }

    state.scheduler.enqueue(sources);

    let summary = match state.scheduler.run().await {
        RunOutcome::Finished(summary) => summary,
        RunOutcome::AlreadyActive => unreachable!("fresh scheduler cannot have an active run"),
    };

    for item in state.scheduler.queue().items() {
        match item.error {
            Some(error) => tracing::warn!(file = %item.file_name, error = %error, "Receipt failed"),
            None => tracing::info!(file = %item.file_name, status = %item.status, "Receipt done"),
        }
    }

    tracing::info!(
        slices = summary.slices,
        completed = summary.counts.completed,
        failed = summary.counts.error,
        interrupted = summary.interrupted,
        "Batch finished"
    );

    if summary.interrupted || summary.counts.error > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
