//! Human-readable progress log and refresh signal for observers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Append-only event log, reset at the start of each run.
///
/// Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct ProgressLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    last_updated: Arc<watch::Sender<Option<DateTime<Utc>>>>,
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressLog {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            last_updated: Arc::new(tx),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "receipt_batch::progress", "{}", message);
        self.entries.lock().push(LogEntry {
            at: Utc::now(),
            message,
        });
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Signal that a record was persisted. Never moves backwards.
    pub fn touch(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut stamped = now;
        self.last_updated.send_modify(|current| {
            stamped = match *current {
                Some(previous) if previous >= now => previous + chrono::Duration::microseconds(1),
                _ => now,
            };
            *current = Some(stamped);
        });
        stamped
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.borrow()
    }

    /// Receiver notified on every [`ProgressLog::touch`].
    pub fn subscribe(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_updated.subscribe()
    }
}
