//! Extraction backends against a local HTTP server: how real transport
//! failures are classified and retried
//!
//! Run with: cargo test --test backend_test

mod fixtures;
mod helpers;

use std::sync::Arc;
use std::time::Duration;

use fixtures::*;
use helpers::backend::{Reply, StubBackend, OLLAMA_RECEIPT, WORKERS_AI_RECEIPT};
use helpers::*;
use receipt_batch::models::queue_item::ItemStatus;
use receipt_batch::models::record::RecordStatus;
use receipt_batch::services::extractor::{ExtractionError, Extractor, RetryingExtractor};
use receipt_batch::services::ollama::OllamaClient;
use receipt_batch::services::progress::ProgressLog;
use receipt_batch::services::retry::{RetryOptions, Transient};
use receipt_batch::services::workers_ai::WorkersAiClient;

const MAX_RETRIES: usize = 2;

fn retry() -> RetryOptions {
    RetryOptions {
        max_retries: MAX_RETRIES,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
    }
}

fn ollama(backend: &StubBackend, request_timeout: Duration) -> RetryingExtractor<OllamaClient> {
    let client = OllamaClient::new(&backend.url, "llava", request_timeout).unwrap();
    RetryingExtractor::new(client, retry())
}

fn workers_ai(backend: &StubBackend) -> RetryingExtractor<WorkersAiClient> {
    let client = WorkersAiClient::new(
        Some("acct"),
        Some("token"),
        "@cf/llava-hf/llava-1.5-7b-hf",
        Duration::from_secs(5),
    )
    .unwrap()
    .with_api_base(&backend.url);
    RetryingExtractor::new(client, retry())
}

#[tokio::test]
async fn test_connection_reset_is_retried_until_exhausted() {
    let backend = StubBackend::start([Reply::Reset]).await;
    let extractor = ollama(&backend, Duration::from_secs(5));
    let log = ProgressLog::new();

    let err = extractor.extract(&receipt_image(1), &log).await.unwrap_err();

    assert!(matches!(err, ExtractionError::ConnectionLost(_)), "got {err:?}");
    assert!(err.is_transient());
    assert_eq!(backend.requests(), MAX_RETRIES + 1);
    assert_eq!(lines_containing(&log.lines(), "Retry attempt"), MAX_RETRIES);
}

#[tokio::test]
async fn test_reset_then_success_recovers() {
    let backend = StubBackend::start([Reply::Reset, Reply::Json(OLLAMA_RECEIPT)]).await;
    let extractor = ollama(&backend, Duration::from_secs(5));
    let log = ProgressLog::new();

    let record = extractor.extract(&receipt_image(1), &log).await.unwrap();

    assert_eq!(record.status, Some(RecordStatus::Draft));
    assert_eq!(record.fields["merchant"], "Corner Market");
    assert_eq!(backend.requests(), 2);
    assert_eq!(lines_containing(&log.lines(), "Retry attempt 1/2"), 1);
}

#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let backend = StubBackend::start([Reply::Status(503)]).await;
    let extractor = workers_ai(&backend);
    let log = ProgressLog::new();

    let err = extractor.extract(&receipt_image(1), &log).await.unwrap_err();

    assert!(
        matches!(&err, ExtractionError::Status { status, .. } if status.as_u16() == 503),
        "got {err:?}"
    );
    assert_eq!(backend.requests(), MAX_RETRIES + 1);
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let backend = StubBackend::start([Reply::Status(429), Reply::Json(WORKERS_AI_RECEIPT)]).await;
    let extractor = workers_ai(&backend);
    let log = ProgressLog::new();

    let record = extractor.extract(&receipt_image(1), &log).await.unwrap();

    assert_eq!(record.fields["total"], 12.75);
    assert_eq!(backend.requests(), 2);
}

#[tokio::test]
async fn test_unauthorized_is_attempted_once() {
    let backend = StubBackend::start([Reply::Status(401)]).await;
    let extractor = workers_ai(&backend);
    let log = ProgressLog::new();

    let err = extractor.extract(&receipt_image(1), &log).await.unwrap_err();

    assert!(
        matches!(&err, ExtractionError::Status { status, .. } if status.as_u16() == 401),
        "got {err:?}"
    );
    assert!(!err.is_transient());
    assert_eq!(backend.requests(), 1);
    assert_eq!(lines_containing(&log.lines(), "Retry attempt"), 0);
}

#[tokio::test]
async fn test_stalled_request_times_out_and_is_retried() {
    let backend = StubBackend::start([Reply::Stall]).await;
    let extractor = ollama(&backend, Duration::from_millis(200));
    let log = ProgressLog::new();

    let err = extractor.extract(&receipt_image(1), &log).await.unwrap_err();

    assert!(matches!(err, ExtractionError::Timeout), "got {err:?}");
    assert_eq!(backend.requests(), MAX_RETRIES + 1);
    let lines = log.lines();
    assert_eq!(lines_containing(&lines, "Retry attempt"), MAX_RETRIES);
    assert_eq!(lines_containing(&lines, "timed out"), MAX_RETRIES);
}

#[tokio::test]
async fn test_unparseable_reply_is_not_retried() {
    let backend = StubBackend::start([Reply::Json("<html>maintenance</html>")]).await;
    let extractor = ollama(&backend, Duration::from_secs(5));
    let log = ProgressLog::new();

    let err = extractor.extract(&receipt_image(1), &log).await.unwrap_err();

    assert!(matches!(err, ExtractionError::Response(_)), "got {err:?}");
    assert_eq!(backend.requests(), 1);
}

#[tokio::test]
async fn test_batch_item_survives_connection_reset() {
    let backend = StubBackend::start([Reply::Reset, Reply::Json(OLLAMA_RECEIPT)]).await;
    let extractor = Arc::new(ollama(&backend, Duration::from_secs(5)));
    let store = Arc::new(MemoryRecordStore::new());
    let scheduler = scheduler(extractor, store.clone(), settings(1));
    let ids = scheduler.enqueue(receipt_batch(1));

    scheduler.run().await;

    assert_eq!(scheduler.queue().get(ids[0]).unwrap().status, ItemStatus::Completed);
    assert_eq!(store.save_calls(), 1);
    let log = scheduler.progress().lines();
    let retry = log
        .iter()
        .position(|line| line.starts_with("Retry attempt 1/2"))
        .expect("retry line");
    let success = log
        .iter()
        .position(|line| line.starts_with("Successfully processed"))
        .expect("success line");
    assert!(retry < success);
}
