//! Data carried across port boundaries.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fusion_domain::{JobId, ScenePlan};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Queue Types
// =============================================================================

pub type QueueItemId = Uuid;

/// Generic queue item with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub id: QueueItemId,
    pub payload: T,
    pub status: QueueItemStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Number of times the item has been dequeued, including the current one.
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl<T> QueueItem<T> {
    pub fn new(payload: T, priority: u8, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            status: QueueItemStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            attempts: 0,
            max_attempts,
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Delayed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => QueueItemStatus::Processing,
            "completed" => QueueItemStatus::Completed,
            "failed" => QueueItemStatus::Failed,
            "delayed" => QueueItemStatus::Delayed,
            _ => QueueItemStatus::Pending,
        }
    }
}

/// Result of waiting on a queue notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Notified,
    Timeout,
}

// =============================================================================
// Task Payloads
// =============================================================================

/// Work item on the `orchestrator` queue: run the whole pipeline for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub job_id: JobId,
    pub prompt: String,
}

/// Local environment generation for a planned job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvTask {
    pub job_id: JobId,
    pub plan_path: String,
    pub provider: String,
    pub version: String,
    pub prompt: String,
}

/// Submission of a remote batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmitTask {
    pub job_id: JobId,
    pub prompt: String,
}

/// Work item on the `env` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvQueueTask {
    Generate(EnvTask),
    SubmitBatch(BatchSubmitTask),
}

impl EnvQueueTask {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Generate(task) => &task.job_id,
            Self::SubmitBatch(task) => &task.job_id,
        }
    }
}

// =============================================================================
// Generation Types
// =============================================================================

/// Input to a generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: JobId,
    /// Scratch directory owned by this job; providers write artifacts below it.
    pub job_root: PathBuf,
    pub prompt: String,
    pub plan: ScenePlan,
}

// =============================================================================
// Batch Job Types
// =============================================================================

/// Submission sent to the remote batch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobRequest {
    /// Unique job name; the pipeline job id makes resubmission idempotent.
    pub name: String,
    pub image_uri: String,
    pub role_arn: String,
    pub instance_type: String,
    pub volume_gb: u32,
    pub max_runtime_secs: u64,
    pub environment: HashMap<String, String>,
}

/// Raw state reported by the batch service for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobState {
    pub name: String,
    /// `InProgress`, `Stopping`, `Completed`, `Failed` or `Stopped`.
    pub status: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}
