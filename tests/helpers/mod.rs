//! Scripted extraction backend and in-memory record store for pipeline tests

#![allow(dead_code)]

pub mod backend;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;

use receipt_batch::config::{ExtractionProvider, ProcessingSettings, SettingsHandle};
use receipt_batch::models::queue_item::ImageSource;
use receipt_batch::models::record::{ExtractedRecord, Fields, ReceiptRecord};
use receipt_batch::services::extractor::{ExtractionError, Extractor, ExtractorRegistry};
use receipt_batch::services::progress::ProgressLog;
use receipt_batch::services::queue::QueueStore;
use receipt_batch::services::retry::RetryOptions;
use receipt_batch::services::scheduler::BatchScheduler;
use receipt_batch::services::storage::{RecordStore, StorageError};

/// What the mock backend does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Draft record with a `file` field naming the image.
    Succeed,
    /// Record with `status = error` and this message.
    Report(&'static str),
    /// Draft record with these envelope fields removed.
    Strip(&'static [&'static str]),
    Timeout,
    Unauthorized,
    Panic,
    /// Never resolves.
    Hang,
}

/// Extraction backend following a per-file script.
///
/// Files without a script (or with an exhausted one) succeed.
pub struct MockExtractor {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    watched_queue: Mutex<Option<QueueStore>>,
    max_processing: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(5))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            watched_queue: Mutex::new(None),
            max_processing: AtomicUsize::new(0),
        }
    }

    pub fn script(self, file: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .insert(file.into(), steps.into_iter().collect());
        self
    }

    /// Sample the queue's `processing` count on every call.
    pub fn watch_queue(&self, queue: QueueStore) {
        *self.watched_queue.lock() = Some(queue);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, file: &str) -> usize {
        self.calls.lock().iter().filter(|f| *f == file).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_processing(&self) -> usize {
        self.max_processing.load(Ordering::SeqCst)
    }

    fn next_step(&self, file: &str) -> Step {
        self.scripts
            .lock()
            .get_mut(file)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Succeed)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(
        &self,
        image: &ImageSource,
        _log: &ProgressLog,
    ) -> Result<ExtractedRecord, ExtractionError> {
        self.calls.lock().push(image.file_name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(queue) = self.watched_queue.lock().as_ref() {
            self.max_processing
                .fetch_max(queue.counts().processing, Ordering::SeqCst);
        }

        let step = self.next_step(&image.file_name);
        tokio::time::sleep(self.delay).await;

        match step {
            Step::Succeed => Ok(record_for(image)),
            Step::Report(message) => Ok(ExtractedRecord::failed(message, image.data_url())),
            Step::Strip(fields) => {
                let mut record = record_for(image);
                for field in fields {
                    match *field {
                        "id" => record.id = None,
                        "status" => record.status = None,
                        "createdAt" => record.created_at = None,
                        other => panic!("unknown envelope field {other}"),
                    }
                }
                Ok(record)
            }
            Step::Timeout => Err(ExtractionError::Timeout),
            Step::Unauthorized => Err(ExtractionError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: "invalid token".to_string(),
            }),
            Step::Panic => panic!("decoder exploded on {}", image.file_name),
            Step::Hang => std::future::pending().await,
        }
    }
}

fn record_for(image: &ImageSource) -> ExtractedRecord {
    let mut fields = Fields::new();
    fields.insert("file".into(), serde_json::json!(image.file_name));
    fields.insert("merchant".into(), serde_json::json!("Corner Market"));
    fields.insert("total".into(), serde_json::json!(12.75));
    ExtractedRecord::draft(fields, image.data_url())
}

/// Record store keeping everything in memory, with per-file save failures.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<ReceiptRecord>>,
    failing_files: Mutex<HashSet<String>>,
    save_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves_for(self, file: impl Into<String>) -> Self {
        self.failing_files.lock().insert(file.into());
        self
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn saved_files(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| r.fields.get("file").and_then(|f| f.as_str()).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &ReceiptRecord) -> Result<(), StorageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let file = record
            .fields
            .get("file")
            .and_then(|f| f.as_str())
            .unwrap_or_default()
            .to_string();
        if self.failing_files.lock().contains(&file) {
            return Err(StorageError::Unavailable("disk quota exceeded".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ReceiptRecord>, StorageError> {
        Ok(self.records.lock().clone())
    }

    async fn get(&self, id: &str) -> Result<Option<ReceiptRecord>, StorageError> {
        Ok(self.records.lock().iter().find(|r| r.id == id).cloned())
    }
}

/// Retry options short enough for tests.
pub fn fast_retry() -> RetryOptions {
    RetryOptions {
        max_retries: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
    }
}

pub fn settings(concurrency_limit: usize) -> SettingsHandle {
    SettingsHandle::new(ProcessingSettings {
        concurrency_limit,
        provider: ExtractionProvider::WorkersAi,
        item_timeout_secs: 30,
    })
}

/// Scheduler wired to the given backend (registered as Workers AI) and store.
pub fn scheduler(
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn RecordStore>,
    settings: SettingsHandle,
) -> BatchScheduler {
    BatchScheduler::new(
        QueueStore::new(),
        ProgressLog::new(),
        settings,
        ExtractorRegistry::new().with(ExtractionProvider::WorkersAi, extractor),
        store,
    )
}

/// Lines of the progress log containing `needle`.
pub fn lines_containing(log: &[String], needle: &str) -> usize {
    log.iter().filter(|line| line.contains(needle)).count()
}

/// Wait until the scheduler reports no active run.
pub async fn wait_until_idle(scheduler: &BatchScheduler) {
    for _ in 0..2000 {
        if !scheduler.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("batch run did not finish in time");
}
