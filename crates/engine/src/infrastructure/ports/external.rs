//! External service port traits (planners, stores, queues, generators, batch service).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fusion_domain::{GenerationOutput, JobId, JobState, ProviderKey, Stage};
use serde_json::Value;

use super::error::{
    BatchJobError, GenerationError, PlannerError, QueueError, StatusStoreError, StorageError,
};
use super::types::{
    BatchJobRequest, BatchJobState, GenerationRequest, QueueItem, QueueItemId, WaitResult,
};

// =============================================================================
// Planner Provider Port
// =============================================================================

/// One remote text-generation endpoint able to propose a ScenePlan.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlannerProviderPort: Send + Sync {
    /// Stable provider name used in logs and API responses.
    fn name(&self) -> &str;

    /// Ask the provider for a plan. Returns the parsed JSON, not yet validated.
    async fn propose(&self, prompt: &str, schema: &Value) -> Result<Value, PlannerError>;
}

// =============================================================================
// Status Store Port
// =============================================================================

/// Latest-status record per job, shared by the API tier and the workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusStorePort: Send + Sync {
    /// Overwrite the job's status.
    ///
    /// Returns `false` when the write was ignored because it would move the
    /// job backwards or the job is already terminal.
    async fn set_status(&self, job_id: &JobId, state: &JobState) -> Result<bool, StatusStoreError>;

    async fn get_status(&self, job_id: &JobId) -> Result<Option<JobState>, StatusStoreError>;
}

// =============================================================================
// Object Store Port
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Time-limited download URL for `key`.
    fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Check a link produced by [`ObjectStorePort::presign`].
    fn verify(&self, key: &str, expires: i64, signature: &str) -> Result<(), StorageError>;
}

// =============================================================================
// Generation Ports
// =============================================================================

/// A named, versioned generation capability for one stage.
#[async_trait]
pub trait GenerationProviderPort: Send + Sync {
    fn key(&self) -> ProviderKey;

    fn version(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError>;
}

/// Lookup of generation providers by `(stage, name)`.
pub trait GeneratorRegistryPort: Send + Sync {
    fn resolve(
        &self,
        stage: Stage,
        name: &str,
    ) -> Result<Arc<dyn GenerationProviderPort>, GenerationError>;
}

// =============================================================================
// Batch Job Port
// =============================================================================

/// Managed batch processing service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchJobPort: Send + Sync {
    async fn submit(&self, request: &BatchJobRequest) -> Result<(), BatchJobError>;

    async fn describe(&self, name: &str) -> Result<BatchJobState, BatchJobError>;
}

// =============================================================================
// Queue Ports
// =============================================================================

/// Durable FIFO-by-priority task queue.
#[async_trait]
pub trait QueuePort<T>: Send + Sync {
    async fn enqueue(&self, payload: T, priority: u8) -> Result<QueueItemId, QueueError>;

    /// Atomically claim the next due item, incrementing its attempt count.
    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError>;

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError>;

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<(), QueueError>;

    /// Put a claimed item back, not to be dequeued before `until`.
    async fn delay(&self, id: QueueItemId, until: DateTime<Utc>) -> Result<(), QueueError>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError>;

    /// Number of pending items.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Delete completed and failed items last updated before `older_than` ago.
    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError>;

    /// Block until an enqueue in this process signals work or `timeout` passes.
    async fn wait_for_work(&self, timeout: Duration) -> WaitResult;

    fn queue_name(&self) -> &str;
}

/// Wake-up channel between enqueuers and workers.
#[async_trait]
pub trait QueueNotificationPort: Send + Sync + Clone {
    /// Signal that new work is available on this queue
    async fn notify_work_available(&self);

    /// Wait for new work notification or timeout
    ///
    /// The timeout doubles as the recovery poll for items enqueued by other
    /// processes, which this notifier never sees.
    async fn wait_for_work(&self, timeout: Duration) -> WaitResult;

    /// Get the queue name this notifier is for (for debugging/logging)
    fn queue_name(&self) -> &str;
}
