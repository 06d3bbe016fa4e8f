use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a queued receipt image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ItemStatus {
    /// `completed` and `error` are terminal; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Error)
    }
}

/// Raw receipt image as handed over by the caller.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageSource {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// MIME type sniffed from the image header, falling back to a generic binary type.
    pub fn mime_type(&self) -> &'static str {
        image::guess_format(&self.bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream")
    }

    /// Embedded `data:` URL used as the record's source image reference.
    pub fn data_url(&self) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition for item {id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub id: Uuid,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

/// One unit of work in the processing queue.
///
/// Status and error are private so that `error` is set if and only if the
/// status is [`ItemStatus::Error`].
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub source: Arc<ImageSource>,
    pub enqueued_at: DateTime<Utc>,
    status: ItemStatus,
    error: Option<String>,
}

impl QueueItem {
    pub fn new(source: ImageSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: Arc::new(source),
            enqueued_at: Utc::now(),
            status: ItemStatus::Pending,
            error: None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn file_name(&self) -> &str {
        &self.source.file_name
    }

    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ItemStatus::Pending, ItemStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ItemStatus::Processing, ItemStatus::Completed)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(ItemStatus::Processing, ItemStatus::Error)?;
        self.error = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, from: ItemStatus, to: ItemStatus) -> Result<(), InvalidTransition> {
        if self.status != from {
            return Err(InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn view(&self) -> QueueItemView {
        QueueItemView {
            id: self.id,
            file_name: self.source.file_name.clone(),
            size_bytes: self.source.bytes.len(),
            status: self.status,
            error: self.error.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Serializable view of a queue item, without the image payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItemView {
    pub id: Uuid,
    pub file_name: String,
    pub size_bytes: usize,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}
