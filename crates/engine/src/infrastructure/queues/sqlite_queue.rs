//! SQLite queue shared by the API process and worker processes.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Row, SqlitePool};

use super::{DEFAULT_LEASE, LEASE_EXHAUSTED};
use crate::infrastructure::ports::{
    QueueError, QueueItem, QueueItemId, QueueItemStatus, QueueNotificationPort, QueuePort,
    WaitResult,
};

/// Fixed-width UTC timestamps so the text columns compare chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteQueue<T, N: QueueNotificationPort> {
    pool: SqlitePool,
    queue_name: String,
    max_attempts: u32,
    lease: Duration,
    notifier: N,
    _phantom: PhantomData<T>,
}

impl<T, N: QueueNotificationPort> SqliteQueue<T, N>
where
    T: Send + Sync + Serialize + DeserializeOwned,
{
    pub async fn new(
        pool: SqlitePool,
        queue_name: impl Into<String>,
        max_attempts: u32,
        notifier: N,
    ) -> Result<Self, QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                job_id TEXT,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                scheduled_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                metadata_json TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_status
            ON queue_items(queue_name, status, priority DESC, created_at)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(Self {
            pool,
            queue_name: queue_name.into(),
            max_attempts: max_attempts.max(1),
            lease: DEFAULT_LEASE,
            notifier,
            _phantom: PhantomData,
        })
    }

    /// How long a claimed item may stay `processing` before another worker
    /// may claim it again.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn lease_cutoff(&self) -> Result<String, QueueError> {
        let lease =
            chrono::Duration::from_std(self.lease).map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(timestamp(Utc::now() - lease))
    }

    fn parse_time(value: &str) -> Result<DateTime<Utc>, QueueError> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| QueueError::Backend(format!("Invalid datetime: {}", e)))
    }

    fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<QueueItem<T>, QueueError> {
        let id_str: String = row.get("id");
        let id = uuid::Uuid::parse_str(&id_str)
            .map_err(|e| QueueError::Backend(format!("Invalid UUID: {}", e)))?;

        let payload_json: String = row.get("payload_json");
        let payload: T = serde_json::from_str(&payload_json)?;

        let status: String = row.get("status");
        let priority: i64 = row.get("priority");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let scheduled_at: Option<String> = row.get("scheduled_at");
        let attempts: i64 = row.get("attempts");
        let max_attempts: i64 = row.get("max_attempts");
        let metadata_json: Option<String> = row.get("metadata_json");
        let metadata: HashMap<String, String> = metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(QueueItem {
            id,
            payload,
            status: QueueItemStatus::parse(&status),
            priority: priority.clamp(0, i64::from(u8::MAX)) as u8,
            created_at: Self::parse_time(&created_at)?,
            updated_at: Self::parse_time(&updated_at)?,
            scheduled_at: scheduled_at.as_deref().map(Self::parse_time).transpose()?,
            attempts: attempts.max(0) as u32,
            max_attempts: max_attempts.max(0) as u32,
            error_message: row.get("error_message"),
            metadata,
        })
    }

    async fn set_terminal(
        &self,
        id: QueueItemId,
        status: QueueItemStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = ?, updated_at = ?, error_message = COALESCE(?, error_message)
            WHERE id = ? AND queue_name = ?
            "#,
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(error)
        .bind(id.to_string())
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T, N: QueueNotificationPort + 'static> QueuePort<T> for SqliteQueue<T, N>
where
    T: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn enqueue(&self, payload: T, priority: u8) -> Result<QueueItemId, QueueError> {
        let id = uuid::Uuid::new_v4();
        let payload_value = serde_json::to_value(&payload)?;
        // Indexed copy of the job id for operators inspecting the table.
        let job_id = payload_value
            .get("job_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let payload_json = serde_json::to_string(&payload_value)?;
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO queue_items
            (id, queue_name, job_id, payload_json, status, priority, created_at, updated_at, attempts, max_attempts, metadata_json)
            VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, 0, ?, '{}')
            "#,
        )
        .bind(id.to_string())
        .bind(&self.queue_name)
        .bind(&job_id)
        .bind(&payload_json)
        .bind(i64::from(priority))
        .bind(&now)
        .bind(&now)
        .bind(i64::from(self.max_attempts))
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        tracing::debug!(queue = %self.queue_name, item_id = %id, job_id = ?job_id, "Enqueued");
        self.notifier.notify_work_available().await;

        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError> {
        let now = timestamp(Utc::now());
        let cutoff = self.lease_cutoff()?;

        // A worker that died mid-item leaves it `processing`; once the lease
        // runs out the item is either reclaimed or, with no attempts left, failed.
        let expired = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'failed', updated_at = ?, error_message = ?
            WHERE queue_name = ?
            AND status = 'processing'
            AND updated_at < ?
            AND attempts >= max_attempts
            "#,
        )
        .bind(&now)
        .bind(LEASE_EXHAUSTED)
        .bind(&self.queue_name)
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;
        if expired.rows_affected() > 0 {
            tracing::warn!(
                queue = %self.queue_name,
                count = expired.rows_affected(),
                "Failed items whose lease expired on their last attempt"
            );
        }

        // Select-and-claim in one statement so two workers never take the same item.
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'processing', updated_at = ?, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue_name = ?
                AND (
                    (status = 'pending')
                    OR (status = 'delayed' AND scheduled_at <= ?)
                    OR (status = 'processing' AND updated_at < ? AND attempts < max_attempts)
                )
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            AND queue_name = ?
            AND (
                (status = 'pending')
                OR (status = 'delayed' AND scheduled_at <= ?)
                OR (status = 'processing' AND updated_at < ? AND attempts < max_attempts)
            )
            RETURNING id
            "#,
        )
        .bind(&now)
        .bind(&self.queue_name)
        .bind(&now)
        .bind(&cutoff)
        .bind(&self.queue_name)
        .bind(&now)
        .bind(&cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        let Some(row) = result else {
            return Ok(None);
        };
        let id_str: String = row.get("id");
        let id = uuid::Uuid::parse_str(&id_str)
            .map_err(|e| QueueError::Backend(format!("Invalid UUID: {}", e)))?;

        self.get(id).await
    }

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError> {
        self.set_terminal(id, QueueItemStatus::Completed, None).await
    }

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<(), QueueError> {
        self.set_terminal(id, QueueItemStatus::Failed, Some(error)).await
    }

    async fn delay(&self, id: QueueItemId, until: DateTime<Utc>) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'delayed', updated_at = ?, scheduled_at = ?
            WHERE id = ? AND queue_name = ?
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(timestamp(until))
        .bind(id.to_string())
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError> {
        let row = sqlx::query("SELECT * FROM queue_items WHERE id = ? AND queue_name = ?")
            .bind(id.to_string())
            .bind(&self.queue_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Database(e.to_string()))?;

        row.map(Self::row_to_item).transpose()
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM queue_items
            WHERE queue_name = ? AND status IN ('pending', 'delayed')
            "#,
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as usize)
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let cutoff = timestamp(Utc::now() - age);

        let result = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE queue_name = ?
            AND status IN ('completed', 'failed')
            AND updated_at < ?
            "#,
        )
        .bind(&self.queue_name)
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn wait_for_work(&self, timeout: Duration) -> WaitResult {
        self.notifier.wait_for_work(timeout).await
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::queues::InProcessNotifier;
    use crate::infrastructure::sqlite::open_pool;

    async fn queue(
        dir: &tempfile::TempDir,
        name: &str,
    ) -> SqliteQueue<serde_json::Value, InProcessNotifier> {
        let path = dir.path().join("queue.db");
        let pool = open_pool(&path.to_string_lossy()).await.expect("pool");
        SqliteQueue::new(pool, name, 2, InProcessNotifier::new(name))
            .await
            .expect("queue")
    }

    #[tokio::test]
    async fn dequeues_by_priority_then_age() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await;

        queue.enqueue(serde_json::json!({"n": 1}), 0).await.expect("enqueue");
        queue.enqueue(serde_json::json!({"n": 2}), 5).await.expect("enqueue");
        assert_eq!(queue.depth().await.expect("depth"), 2);

        let first = queue.dequeue().await.expect("dequeue").expect("item");
        assert_eq!(first.payload["n"], 2);
        assert_eq!(first.status, QueueItemStatus::Processing);
        assert_eq!(first.attempts, 1);

        let second = queue.dequeue().await.expect("dequeue").expect("item");
        assert_eq!(second.payload["n"], 1);
        assert!(queue.dequeue().await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn queues_sharing_a_file_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = queue(&dir, "env").await;
        let orchestrator = queue(&dir, "orchestrator").await;

        env.enqueue(serde_json::json!({"job_id": "scn_1"}), 0).await.expect("enqueue");

        assert!(orchestrator.dequeue().await.expect("dequeue").is_none());
        assert!(env.dequeue().await.expect("dequeue").is_some());
    }

    #[tokio::test]
    async fn delayed_items_wait_until_due() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await;

        let id = queue.enqueue(serde_json::json!({}), 0).await.expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("item");
        queue
            .delay(id, Utc::now() + chrono::Duration::hours(1))
            .await
            .expect("delay");
        assert!(queue.dequeue().await.expect("dequeue").is_none());

        queue
            .delay(id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .expect("delay");
        let item = queue.dequeue().await.expect("dequeue").expect("item");
        assert_eq!(item.attempts, 2);
        assert!(item.attempts_exhausted());
    }

    #[tokio::test]
    async fn fail_records_error_and_cleanup_removes_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await;

        let id = queue.enqueue(serde_json::json!({}), 0).await.expect("enqueue");
        queue.fail(id, "boom").await.expect("fail");

        let item = queue.get(id).await.expect("get").expect("item");
        assert_eq!(item.status, QueueItemStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("boom"));

        let removed = queue.cleanup(Duration::ZERO).await.expect("cleanup");
        assert_eq!(removed, 1);
        assert!(queue.get(id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn abandoned_item_is_redelivered_after_lease() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await.with_lease(Duration::from_millis(20));

        let id = queue.enqueue(serde_json::json!({}), 0).await.expect("enqueue");
        let first = queue.dequeue().await.expect("dequeue").expect("item");
        assert_eq!(first.attempts, 1);
        assert!(queue.dequeue().await.expect("dequeue").is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let again = queue.dequeue().await.expect("dequeue").expect("redelivered");
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
        assert_eq!(again.status, QueueItemStatus::Processing);
    }

    #[tokio::test]
    async fn lease_expiry_on_last_attempt_fails_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await.with_lease(Duration::from_millis(20));

        let id = queue.enqueue(serde_json::json!({}), 0).await.expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("item");
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.dequeue().await.expect("dequeue").expect("redelivered");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(queue.dequeue().await.expect("dequeue").is_none());
        let item = queue.get(id).await.expect("get").expect("item");
        assert_eq!(item.status, QueueItemStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some(LEASE_EXHAUSTED));
        assert_eq!(queue.depth().await.expect("depth"), 0);
    }

    #[tokio::test]
    async fn live_lease_is_not_reclaimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await;

        queue.enqueue(serde_json::json!({}), 0).await.expect("enqueue");
        queue.dequeue().await.expect("dequeue").expect("item");

        assert!(queue.dequeue().await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn completing_unknown_item_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue(&dir, "env").await;

        let err = queue.complete(uuid::Uuid::new_v4()).await.expect_err("missing");
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}
