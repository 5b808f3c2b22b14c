//! Job submission and status lookup for the request tier.

use std::sync::Arc;

use fusion_domain::{DomainError, JobId, JobState};
use fusion_shared::{BatchStatusResponse, GenerationAccepted, JobStatusResponse};

use crate::infrastructure::config::DispatchMode;
use crate::infrastructure::ports::{
    BatchJobError, BatchJobPort, BatchSubmitTask, EnvQueueTask, PipelineTask, QueueError,
    QueuePort, StatusStoreError, StatusStorePort,
};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidId(#[from] DomainError),

    #[error(transparent)]
    StatusStore(#[from] StatusStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Batch(#[from] BatchJobError),
}

/// Accept a prompt and hand it to the background tier.
pub struct SubmitGeneration {
    mode: DispatchMode,
    status: Arc<dyn StatusStorePort>,
    orchestrator_queue: Arc<dyn QueuePort<PipelineTask>>,
    env_queue: Arc<dyn QueuePort<EnvQueueTask>>,
}

impl SubmitGeneration {
    pub fn new(
        mode: DispatchMode,
        status: Arc<dyn StatusStorePort>,
        orchestrator_queue: Arc<dyn QueuePort<PipelineTask>>,
        env_queue: Arc<dyn QueuePort<EnvQueueTask>>,
    ) -> Self {
        Self {
            mode,
            status,
            orchestrator_queue,
            env_queue,
        }
    }

    pub async fn execute(&self, prompt: String) -> Result<GenerationAccepted, JobError> {
        let job_id = JobId::new();

        match self.mode {
            DispatchMode::Local => {
                // Written before enqueueing so the job is readable immediately.
                self.status.set_status(&job_id, &JobState::queued()).await?;
                self.orchestrator_queue
                    .enqueue(PipelineTask { job_id: job_id.clone(), prompt }, 0)
                    .await?;
                tracing::info!(job_id = %job_id, "Generation queued");
                Ok(GenerationAccepted::queued(job_id.to_string()))
            }
            DispatchMode::Remote => {
                let task_id = self
                    .env_queue
                    .enqueue(
                        EnvQueueTask::SubmitBatch(BatchSubmitTask {
                            job_id: job_id.clone(),
                            prompt,
                        }),
                        0,
                    )
                    .await?;
                tracing::info!(job_id = %job_id, task_id = %task_id, "Batch submission queued");
                Ok(GenerationAccepted::submitted(task_id.to_string(), job_id.to_string()))
            }
        }
    }
}

/// Status as seen by the caller; the shape depends on the dispatch mode.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatusView {
    Local(JobStatusResponse),
    Remote(BatchStatusResponse),
}

/// Read a job's status: from the status store in local mode, live from the
/// batch service in remote mode.
pub struct GetJobStatus {
    mode: DispatchMode,
    status: Arc<dyn StatusStorePort>,
    batch: Arc<dyn BatchJobPort>,
}

impl GetJobStatus {
    pub fn new(
        mode: DispatchMode,
        status: Arc<dyn StatusStorePort>,
        batch: Arc<dyn BatchJobPort>,
    ) -> Self {
        Self {
            mode,
            status,
            batch,
        }
    }

    pub async fn execute(&self, job_id: &str) -> Result<JobStatusView, JobError> {
        let job_id = JobId::parse(job_id)?;
        match self.mode {
            DispatchMode::Local => self.local(&job_id).await.map(JobStatusView::Local),
            DispatchMode::Remote => self.remote(&job_id).await.map(JobStatusView::Remote),
        }
    }

    async fn local(&self, job_id: &JobId) -> Result<JobStatusResponse, JobError> {
        let response = match self.status.get_status(job_id).await? {
            Some(state) => JobStatusResponse {
                job_id: job_id.to_string(),
                status: state.status.to_string(),
                detail: (!state.detail.is_empty()).then_some(state.detail),
            },
            None => JobStatusResponse::unknown(job_id.to_string()),
        };
        Ok(response)
    }

    async fn remote(&self, job_id: &JobId) -> Result<BatchStatusResponse, JobError> {
        match self.batch.describe(job_id.as_str()).await {
            Ok(job) => Ok(BatchStatusResponse {
                state: batch_state(&job.status).to_string(),
                job_id: job_id.to_string(),
                batch_status: Some(job.status),
            }),
            Err(BatchJobError::NotFound(_)) => Ok(BatchStatusResponse {
                state: "UNKNOWN".to_string(),
                job_id: job_id.to_string(),
                batch_status: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Collapse the batch service's job status into `PENDING`/`SUCCESS`/`FAILURE`.
pub fn batch_state(status: &str) -> &'static str {
    match status {
        "InProgress" | "Stopping" => "PENDING",
        "Completed" => "SUCCESS",
        _ => "FAILURE",
    }
}
