//! In-memory queue for tests and single-process development runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DEFAULT_LEASE, LEASE_EXHAUSTED};
use crate::infrastructure::ports::{
    QueueError, QueueItem, QueueItemId, QueueItemStatus, QueueNotificationPort, QueuePort,
    WaitResult,
};

pub struct InMemoryQueue<T, N: QueueNotificationPort> {
    items: RwLock<Vec<QueueItem<T>>>,
    queue_name: String,
    max_attempts: u32,
    lease: Duration,
    notifier: N,
}

impl<T, N: QueueNotificationPort> InMemoryQueue<T, N> {
    pub fn new(queue_name: impl Into<String>, max_attempts: u32, notifier: N) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            queue_name: queue_name.into(),
            max_attempts: max_attempts.max(1),
            lease: DEFAULT_LEASE,
            notifier,
        }
    }

    /// How long a claimed item may stay `processing` before it is redelivered.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn update<F>(&self, id: QueueItemId, apply: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut QueueItem<T>) + Send,
    {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        apply(item);
        item.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl<T, N: QueueNotificationPort + 'static> QueuePort<T> for InMemoryQueue<T, N>
where
    T: Send + Sync + Clone + 'static,
{
    async fn enqueue(&self, payload: T, priority: u8) -> Result<QueueItemId, QueueError> {
        let item = QueueItem::new(payload, priority, self.max_attempts);
        let id = item.id;
        self.items.write().await.push(item);

        self.notifier.notify_work_available().await;
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError> {
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let mut items = self.items.write().await;
        let now = Utc::now();
        let cutoff = now - lease;

        for item in items.iter_mut() {
            if item.status == QueueItemStatus::Processing
                && item.updated_at < cutoff
                && item.attempts_exhausted()
            {
                tracing::warn!(queue = %self.queue_name, item_id = %item.id, "{}", LEASE_EXHAUSTED);
                item.status = QueueItemStatus::Failed;
                item.error_message = Some(LEASE_EXHAUSTED.to_string());
                item.updated_at = now;
            }
        }

        let next = items
            .iter()
            .enumerate()
            .filter(|(_, item)| match item.status {
                QueueItemStatus::Pending => true,
                QueueItemStatus::Delayed => item.scheduled_at.is_some_and(|at| at <= now),
                QueueItemStatus::Processing => item.updated_at < cutoff,
                _ => false,
            })
            // Highest priority first, then oldest.
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .map(|(idx, _)| idx);

        Ok(next.map(|idx| {
            let item = &mut items[idx];
            item.status = QueueItemStatus::Processing;
            item.attempts += 1;
            item.updated_at = now;
            item.clone()
        }))
    }

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError> {
        self.update(id, |item| item.status = QueueItemStatus::Completed)
            .await
    }

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<(), QueueError> {
        let error = error.to_string();
        self.update(id, move |item| {
            item.status = QueueItemStatus::Failed;
            item.error_message = Some(error);
        })
        .await
    }

    async fn delay(&self, id: QueueItemId, until: DateTime<Utc>) -> Result<(), QueueError> {
        self.update(id, move |item| {
            item.status = QueueItemStatus::Delayed;
            item.scheduled_at = Some(until);
        })
        .await
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError> {
        let items = self.items.read().await;
        Ok(items.iter().find(|item| item.id == id).cloned())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|item| {
                matches!(
                    item.status,
                    QueueItemStatus::Pending | QueueItemStatus::Delayed
                )
            })
            .count())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let cutoff = Utc::now() - age;

        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|item| {
            let finished = matches!(
                item.status,
                QueueItemStatus::Completed | QueueItemStatus::Failed
            );
            !(finished && item.updated_at <= cutoff)
        });
        Ok(before - items.len())
    }

    async fn wait_for_work(&self, timeout: Duration) -> WaitResult {
        self.notifier.wait_for_work(timeout).await
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
