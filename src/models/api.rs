use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::queue_item::QueueItemView;
use crate::services::progress::LogEntry;

/// Response after uploading receipt images.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub item_ids: Vec<Uuid>,
    pub message: String,
}

/// Response for a run start request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub started: bool,
    pub message: String,
}

/// Point-in-time view of the queue and the current run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub active: bool,
    pub items: Vec<QueueItemView>,
    pub counts: QueueCounts,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    /// `completed + error`.
    pub processed: usize,
}

/// Progress log of the current or last run, oldest line first.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogResponse {
    pub active: bool,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
