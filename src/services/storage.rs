use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::queries;
use crate::models::record::ReceiptRecord;

/// Durable store for validated receipt records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist one record. Single-record writes are atomic.
    async fn save(&self, record: &ReceiptRecord) -> Result<(), StorageError>;

    async fn list_all(&self) -> Result<Vec<ReceiptRecord>, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<ReceiptRecord>, StorageError>;
}

/// Record store backed by the local SQLite document table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save(&self, record: &ReceiptRecord) -> Result<(), StorageError> {
        queries::insert_record(&self.pool, record).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ReceiptRecord>, StorageError> {
        Ok(queries::list_records(&self.pool).await?)
    }

    async fn get(&self, id: &str) -> Result<Option<ReceiptRecord>, StorageError> {
        Ok(queries::get_record(&self.pool, id).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
