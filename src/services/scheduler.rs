//! Batch scheduler: drives pending queue items through extraction,
//! validation and persistence in bounded concurrent slices.
//!
//! A run claims the first `concurrency_limit` pending items, processes them
//! concurrently, waits for the whole slice to settle and then re-reads the
//! queue. Items enqueued during a run are picked up by a later slice. The run
//! ends when a re-read finds nothing pending.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use uuid::Uuid;

use crate::config::{ProcessingSettings, SettingsHandle};
use crate::models::api::{QueueCounts, QueueSnapshot};
use crate::models::queue_item::{ImageSource, QueueItem};
use crate::services::extractor::{ExtractionError, Extractor, ExtractorRegistry};
use crate::services::progress::ProgressLog;
use crate::services::queue::{QueueError, QueueStore};
use crate::services::storage::RecordStore;
use crate::services::validation::{validate_record, Rejection};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("No extraction backend available: {0}")]
    Extractor(#[from] ExtractionError),
}

/// Result of a call to [`BatchScheduler::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was already active; nothing was touched.
    AlreadyActive,
    Finished(RunSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub slices: usize,
    pub interrupted: bool,
    pub counts: QueueCounts,
}

/// Owns the "run active" flag and the processing loop.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct BatchScheduler {
    queue: QueueStore,
    progress: ProgressLog,
    settings: SettingsHandle,
    extractors: ExtractorRegistry,
    records: Arc<dyn RecordStore>,
    active: Arc<AtomicBool>,
}

impl BatchScheduler {
    pub fn new(
        queue: QueueStore,
        progress: ProgressLog,
        settings: SettingsHandle,
        extractors: ExtractorRegistry,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            queue,
            progress,
            settings,
            extractors,
            records,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn progress(&self) -> &ProgressLog {
        &self.progress
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Add images as pending items. Allowed at any time, including mid-run.
    pub fn enqueue(&self, sources: impl IntoIterator<Item = ImageSource>) -> Vec<Uuid> {
        let ids = self.queue.enqueue(sources);
        metrics::counter!("receipt_items_enqueued_total").increment(ids.len() as u64);
        tracing::info!(count = ids.len(), "Enqueued receipt images");
        ids
    }

    /// Remove a pending item while no run is active.
    pub fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        if self.is_active() {
            return Err(QueueError::RunActive);
        }
        self.queue.remove_pending(id)
    }

    /// Empty the queue and the log while no run is active.
    pub fn clear(&self) -> Result<(), QueueError> {
        if self.is_active() {
            return Err(QueueError::RunActive);
        }
        self.queue.clear();
        self.progress.clear();
        Ok(())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let (items, counts) = self.queue.snapshot();
        QueueSnapshot {
            active: self.is_active(),
            items,
            counts,
            last_updated: self.progress.last_updated(),
        }
    }

    /// Start a run in the background. Returns `false` if one is already active.
    ///
    /// The active flag is taken before this returns, so a second call made
    /// right after is always a no-op.
    pub fn start(&self) -> bool {
        let Some(run) = self.try_activate() else {
            tracing::debug!("Batch run already active, ignoring start request");
            return false;
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.drive(run).await;
        });
        true
    }

    /// Run to completion on the current task. Never fails; faults end up in the log.
    pub async fn run(&self) -> RunOutcome {
        match self.try_activate() {
            Some(run) => RunOutcome::Finished(self.drive(run).await),
            None => RunOutcome::AlreadyActive,
        }
    }

    fn try_activate(&self) -> Option<ActiveRun> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.progress.clear();
        Some(ActiveRun {
            active: Arc::clone(&self.active),
            progress: self.progress.clone(),
        })
    }

    async fn drive(&self, run: ActiveRun) -> RunSummary {
        let settings = self.settings.current();
        metrics::counter!("receipt_batch_runs_total").increment(1);
        tracing::info!(
            concurrency_limit = settings.concurrency_limit,
            provider = %settings.provider,
            "Starting batch run"
        );
        self.progress.push(format!(
            "Starting batch run (concurrency {}, provider {})",
            settings.concurrency_limit, settings.provider
        ));

        let outcome = AssertUnwindSafe(self.process_pending(&settings))
            .catch_unwind()
            .await;

        let (slices, fault) = match outcome {
            Ok(Ok(slices)) => (slices, None),
            Ok(Err(err)) => (0, Some(err.to_string())),
            Err(panic) => (0, Some(panic_message(panic.as_ref()))),
        };

        if let Some(reason) = &fault {
            tracing::error!(error = %reason, "Batch interrupted");
            self.progress
                .push(format!("Batch interrupted by system error: {reason}"));
            let abandoned = self.queue.fail_processing("Batch interrupted by system error");
            if abandoned > 0 {
                metrics::counter!("receipt_items_failed_total").increment(abandoned as u64);
            }
        }

        drop(run);

        let counts = self.queue.counts();
        tracing::info!(
            completed = counts.completed,
            failed = counts.error,
            pending = counts.pending,
            "Batch run finished"
        );
        RunSummary {
            slices,
            interrupted: fault.is_some(),
            counts,
        }
    }

    async fn process_pending(&self, settings: &ProcessingSettings) -> Result<usize, SchedulerError> {
        if self.queue.pending_ids().is_empty() {
            self.progress.push("No pending items to process");
            return Ok(0);
        }

        let extractor = self.extractors.resolve(settings.provider)?;

        let limit = settings.concurrency_limit.max(1);
        let pipeline = ItemPipeline {
            queue: self.queue.clone(),
            progress: self.progress.clone(),
            records: Arc::clone(&self.records),
            extractor,
            timeout: settings.item_timeout(),
        };

        let mut slices = 0;
        loop {
            // Re-read live queue state at every slice boundary.
            let slice = self.queue.claim_pending(limit);
            if slice.is_empty() {
                break;
            }
            slices += 1;
            self.progress
                .push(format!("Processing slice {} ({} items)", slices, slice.len()));
            self.run_slice(&pipeline, slice).await;
        }

        Ok(slices)
    }

    /// Start every item of the slice, then wait for all of them to settle.
    async fn run_slice(&self, pipeline: &ItemPipeline, slice: Vec<QueueItem>) {
        let mut members = Vec::with_capacity(slice.len());
        let mut handles = Vec::with_capacity(slice.len());
        for item in slice {
            members.push((item.id, item.file_name().to_string()));
            handles.push(tokio::spawn(pipeline.clone().process(item)));
        }

        for ((id, file), joined) in members.into_iter().zip(join_all(handles).await) {
            let Err(err) = joined else {
                continue;
            };
            let reason = if err.is_panic() {
                panic_message(err.into_panic().as_ref())
            } else {
                "processing task was cancelled".to_string()
            };
            tracing::error!(item_id = %id, file = %file, error = %reason, "Item task aborted");
            self.progress
                .push(format!("Critical failure processing {file}: {reason}"));
            pipeline.settle_failure(id, &file, reason);
        }
    }
}

/// Clears the active flag when the run ends, however it ends.
struct ActiveRun {
    active: Arc<AtomicBool>,
    progress: ProgressLog,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.progress.push("Processing queue finished");
        self.active.store(false, Ordering::Release);
    }
}

/// Everything one item needs, cloned into its task.
#[derive(Clone)]
struct ItemPipeline {
    queue: QueueStore,
    progress: ProgressLog,
    records: Arc<dyn RecordStore>,
    extractor: Arc<dyn Extractor>,
    timeout: Duration,
}

impl ItemPipeline {
    async fn process(self, item: QueueItem) {
        let file = item.file_name().to_string();
        self.progress.push(format!("Processing {file}"));

        let started = Instant::now();
        let extracted = tokio::time::timeout(
            self.timeout,
            self.extractor.extract(&item.source, &self.progress),
        )
        .await;
        metrics::histogram!("receipt_extraction_seconds").record(started.elapsed().as_secs_f64());

        let record = match extracted {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                tracing::error!(item_id = %item.id, file = %file, error = %err, "Extraction failed");
                self.progress
                    .push(format!("Critical failure processing {file}: {err}"));
                self.settle_failure(item.id, &file, err.to_string());
                return;
            }
            Err(_) => {
                let reason = format!("Extraction timed out after {}s", self.timeout.as_secs());
                tracing::error!(item_id = %item.id, file = %file, "Extraction timed out");
                self.progress
                    .push(format!("Critical failure processing {file}: {reason}"));
                self.settle_failure(item.id, &file, reason);
                return;
            }
        };
        self.progress
            .push(format!("Extracted data from {file} via {}", self.extractor.name()));

        let record = match validate_record(record) {
            Ok(record) => record,
            Err(rejection @ Rejection::MissingFields(_)) => {
                tracing::warn!(item_id = %item.id, file = %file, %rejection, "Record failed validation");
                self.progress
                    .push(format!("Validation failed for {file}: {rejection}"));
                self.settle_failure(item.id, &file, rejection.to_string());
                return;
            }
            Err(Rejection::Reported(message)) => {
                tracing::warn!(item_id = %item.id, file = %file, error = %message, "Backend reported extraction error");
                self.progress
                    .push(format!("Extraction error for {file}: {message}"));
                self.settle_failure(item.id, &file, message);
                return;
            }
        };

        if let Err(err) = self.records.save(&record).await {
            tracing::error!(item_id = %item.id, file = %file, error = %err, "Failed to save record");
            self.progress.push(format!("Save failed for {file}: {err}"));
            self.settle_failure(item.id, &file, format!("Failed to save record: {err}"));
            return;
        }
        self.progress.touch();

        match self.queue.complete(item.id) {
            Ok(()) => {
                metrics::counter!("receipt_items_completed_total").increment(1);
                tracing::info!(item_id = %item.id, record_id = %record.id, file = %file, "Receipt processed");
                self.progress
                    .push(format!("Successfully processed {file}"));
            }
            Err(err) => self.report_lost_update(item.id, &file, &err),
        }
    }

    fn settle_failure(&self, id: Uuid, file: &str, reason: String) {
        match self.queue.fail(id, reason) {
            Ok(()) => metrics::counter!("receipt_items_failed_total").increment(1),
            Err(err) => self.report_lost_update(id, file, &err),
        }
    }

    fn report_lost_update(&self, id: Uuid, file: &str, err: &QueueError) {
        tracing::warn!(item_id = %id, file = %file, error = %err, "Could not record item outcome");
        if let QueueError::NotFound(_) = err {
            self.progress
                .push(format!("{file} left the queue before it finished"));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
