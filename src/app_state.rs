use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::SettingsHandle;
use crate::services::{
    extractor::ExtractorRegistry,
    progress::ProgressLog,
    queue::QueueStore,
    scheduler::BatchScheduler,
    storage::{RecordStore, SqliteRecordStore},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub scheduler: BatchScheduler,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: SettingsHandle, extractors: ExtractorRegistry) -> Self {
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db.clone()));
        let scheduler = BatchScheduler::new(
            QueueStore::new(),
            ProgressLog::new(),
            settings,
            extractors,
            records,
        );
        Self { db, scheduler }
    }
}
