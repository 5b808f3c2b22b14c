//! In-process queue wake-ups built on `tokio::sync::Notify`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::infrastructure::ports::{QueueNotificationPort, WaitResult};

/// Wakes workers in the same process as the enqueuer.
///
/// Workers in other processes fall back to polling via the wait timeout.
#[derive(Clone)]
pub struct InProcessNotifier {
    notify: Arc<Notify>,
    queue_name: String,
}

impl InProcessNotifier {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl QueueNotificationPort for InProcessNotifier {
    async fn notify_work_available(&self) {
        self.notify.notify_one();
    }

    async fn wait_for_work(&self, timeout: Duration) -> WaitResult {
        match tokio::time::timeout(timeout, self.notify.notified()).await {
            Ok(()) => WaitResult::Notified,
            Err(_) => WaitResult::Timeout,
        }
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
