use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::api::QueueCounts;
use crate::models::queue_item::{ImageSource, InvalidTransition, ItemStatus, QueueItem, QueueItemView};

/// In-memory work queue shared between callers and the batch scheduler.
///
/// Every operation takes the lock once, so a status change is never
/// observed half-applied. Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct QueueStore {
    items: Arc<Mutex<Vec<QueueItem>>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append images as `pending` items, preserving their order.
    pub fn enqueue(&self, sources: impl IntoIterator<Item = ImageSource>) -> Vec<Uuid> {
        let new_items: Vec<QueueItem> = sources.into_iter().map(QueueItem::new).collect();
        let ids = new_items.iter().map(|item| item.id).collect();
        let mut items = self.items.lock();
        items.extend(new_items);
        metrics::gauge!("receipt_queue_pending").set(pending_count(&items) as f64);
        ids
    }

    /// Remove a `pending` item. The caller checks that no run is active.
    pub fn remove_pending(&self, id: Uuid) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        let index = items
            .iter()
            .position(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))?;
        let status = items[index].status();
        if status != ItemStatus::Pending {
            return Err(QueueError::NotPending { id, status });
        }
        items.remove(index);
        metrics::gauge!("receipt_queue_pending").set(pending_count(&items) as f64);
        Ok(())
    }

    pub fn clear(&self) {
        self.items.lock().clear();
        metrics::gauge!("receipt_queue_pending").set(0.0);
    }

    /// Claim up to `limit` pending items in queue order, marking them
    /// `processing` under a single lock.
    pub fn claim_pending(&self, limit: usize) -> Vec<QueueItem> {
        let mut items = self.items.lock();
        let mut claimed = Vec::new();
        for item in items.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            if item.begin().is_ok() {
                claimed.push(item.clone());
            }
        }
        metrics::gauge!("receipt_queue_pending").set(pending_count(&items) as f64);
        claimed
    }

    pub fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        self.update(id, QueueItem::complete)
    }

    pub fn fail(&self, id: Uuid, reason: impl Into<String>) -> Result<(), QueueError> {
        let reason = reason.into();
        self.update(id, |item| item.fail(reason))
    }

    /// Fail every item still `processing`, returning how many were affected.
    pub fn fail_processing(&self, reason: &str) -> usize {
        let mut items = self.items.lock();
        items
            .iter_mut()
            .filter(|item| item.status() == ItemStatus::Processing)
            .map(|item| item.fail(reason))
            .filter(Result::is_ok)
            .count()
    }

    fn update(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut QueueItem) -> Result<(), InvalidTransition>,
    ) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))?;
        apply(item)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<QueueItemView> {
        self.items.lock().iter().find(|item| item.id == id).map(QueueItem::view)
    }

    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.items
            .lock()
            .iter()
            .filter(|item| item.status() == ItemStatus::Pending)
            .map(|item| item.id)
            .collect()
    }

    pub fn items(&self) -> Vec<QueueItemView> {
        self.items.lock().iter().map(QueueItem::view).collect()
    }

    /// Items and counters taken from one consistent view of the queue.
    pub fn snapshot(&self) -> (Vec<QueueItemView>, QueueCounts) {
        let items = self.items.lock();
        let views = items.iter().map(QueueItem::view).collect();
        (views, count(&items))
    }

    pub fn counts(&self) -> QueueCounts {
        count(&self.items.lock())
    }
}

fn pending_count(items: &[QueueItem]) -> usize {
    items
        .iter()
        .filter(|item| item.status() == ItemStatus::Pending)
        .count()
}

fn count(items: &[QueueItem]) -> QueueCounts {
    let mut counts = QueueCounts {
        total: items.len(),
        ..QueueCounts::default()
    };
    for item in items {
        let status = item.status();
        match status {
            ItemStatus::Pending => counts.pending += 1,
            ItemStatus::Processing => counts.processing += 1,
            ItemStatus::Completed => counts.completed += 1,
            ItemStatus::Error => counts.error += 1,
        }
        if status.is_terminal() {
            counts.processed += 1;
        }
    }
    counts
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue item {0} not found")]
    NotFound(Uuid),

    #[error("Queue item {id} is {status}, only pending items can be removed")]
    NotPending { id: Uuid, status: ItemStatus },

    #[error("A batch run is active")]
    RunActive,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}
