//! The per-job stage sequencer.
//!
//! `planning -> planned -> env_gen -> env_queued | done`, or `error` at the
//! failing stage. Nothing here retries; retries live in the planner chain
//! and in batch submission. A task redelivered after a worker crash resumes
//! from the recorded status instead of starting over.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fusion_domain::{JobId, JobState, JobStatus, PipelineStage};

use super::dispatch::{EnvStageError, ProcessEnvTask};
use super::planning::PlanScene;
use crate::infrastructure::config::{EnvDispatch, PipelineConfig};
use crate::infrastructure::ports::{
    EnvQueueTask, EnvTask, PipelineTask, QueueError, QueuePort, StatusStoreError, StatusStorePort,
};

/// Infrastructure failure that prevented the pipeline from recording its
/// outcome. Stage failures are not errors here; they are written as status.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    StatusStore(#[from] StatusStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Where a pipeline run left the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Async mode: environment generation handed to the `env` queue.
    EnvQueued { task_id: String },
    /// Sync mode: environment generated inline.
    Done { scene_glb: String },
    Failed { stage: PipelineStage, message: String },
    /// The job was already handed to the env stage or finished by an earlier
    /// delivery of the same task.
    AlreadyDispatched { status: JobStatus },
}

pub struct RunPipeline {
    planner: Arc<PlanScene>,
    status: Arc<dyn StatusStorePort>,
    env_queue: Arc<dyn QueuePort<EnvQueueTask>>,
    env_stage: Arc<ProcessEnvTask>,
    config: PipelineConfig,
}

impl RunPipeline {
    pub fn new(
        planner: Arc<PlanScene>,
        status: Arc<dyn StatusStorePort>,
        env_queue: Arc<dyn QueuePort<EnvQueueTask>>,
        env_stage: Arc<ProcessEnvTask>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            planner,
            status,
            env_queue,
            env_stage,
            config,
        }
    }

    pub async fn execute(&self, task: &PipelineTask) -> Result<PipelineOutcome, PipelineError> {
        let job_id = &task.job_id;
        let current = self.status.get_status(job_id).await?.map(|state| state.status);
        if let Some(status) = current {
            if status.is_terminal() || status.rank() >= JobStatus::EnvQueued.rank() {
                tracing::info!(job_id = %job_id, %status, "Job already dispatched, skipping");
                return Ok(PipelineOutcome::AlreadyDispatched { status });
            }
        }

        let plan_path = match self.existing_plan(job_id, current).await {
            Some(path) => {
                tracing::info!(job_id = %job_id, path = %path.display(), "Resuming with persisted plan");
                path
            }
            None => match self.plan(task).await? {
                Ok(path) => path,
                Err(message) => return self.fail(job_id, PipelineStage::Planning, message).await,
            },
        };
        let plan_path = plan_path.to_string_lossy().into_owned();
        self.status
            .set_status(job_id, &JobState::planned(plan_path.clone()))
            .await?;

        self.status.set_status(job_id, &JobState::env_gen()).await?;
        let env_task = EnvTask {
            job_id: job_id.clone(),
            plan_path,
            provider: self.config.env_provider.clone(),
            version: self.config.env_provider_version.clone(),
            prompt: task.prompt.clone(),
        };

        match self.config.env_dispatch {
            EnvDispatch::Async => self.dispatch_async(env_task).await,
            EnvDispatch::Sync => self.dispatch_sync(&env_task).await,
        }
    }

    async fn plan(&self, task: &PipelineTask) -> Result<Result<PathBuf, String>, PipelineError> {
        let job_id = &task.job_id;
        self.status.set_status(job_id, &JobState::planning()).await?;

        let outcome = match self.planner.execute(&task.prompt).await {
            Ok(outcome) => outcome,
            Err(e) => return Ok(Err(e.to_string())),
        };
        tracing::info!(job_id = %job_id, provider = %outcome.provider, "Plan ready");
        Ok(self.persist_plan(job_id, &outcome.plan).await)
    }

    fn plan_file(&self, job_id: &JobId) -> PathBuf {
        self.config.job_tmp_dir.join(format!("{job_id}_plan.json"))
    }

    /// A plan written by an earlier delivery, if the job got past planning.
    async fn existing_plan(&self, job_id: &JobId, current: Option<JobStatus>) -> Option<PathBuf> {
        if !matches!(current, Some(JobStatus::Planned | JobStatus::EnvGen)) {
            return None;
        }
        let path = self.plan_file(job_id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    /// Best-effort `error` record after an infrastructure failure, attributed
    /// to the stage the job had reached.
    pub async fn abandon(&self, job_id: &JobId, error: &PipelineError) {
        let stage = match self.status.get_status(job_id).await {
            Ok(Some(state)) if state.status.rank() >= JobStatus::EnvGen.rank() => {
                PipelineStage::EnvGen
            }
            _ => PipelineStage::Planning,
        };
        let message = error.to_string();
        tracing::error!(job_id = %job_id, %stage, error = %message, "Pipeline aborted");
        if let Err(e) = self
            .status
            .set_status(job_id, &JobState::failed(stage, message))
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Could not record pipeline failure");
        }
    }

    async fn persist_plan(
        &self,
        job_id: &JobId,
        plan: &fusion_domain::ScenePlan,
    ) -> Result<PathBuf, String> {
        let json = plan.to_canonical_json().map_err(|e| e.to_string())?;
        tokio::fs::create_dir_all(&self.config.job_tmp_dir)
            .await
            .map_err(|e| format!("create {}: {e}", self.config.job_tmp_dir.display()))?;
        let path = self.plan_file(job_id);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| format!("write {}: {e}", path.display()))?;
        Ok(path)
    }

    /// The env worker owns the terminal status write from here on.
    async fn dispatch_async(&self, env_task: EnvTask) -> Result<PipelineOutcome, PipelineError> {
        let job_id = env_task.job_id.clone();
        let task_id = self
            .env_queue
            .enqueue(EnvQueueTask::Generate(env_task), 0)
            .await?
            .to_string();

        self.status
            .set_status(&job_id, &JobState::env_queued(task_id.clone()))
            .await?;
        Ok(PipelineOutcome::EnvQueued { task_id })
    }

    async fn dispatch_sync(&self, env_task: &EnvTask) -> Result<PipelineOutcome, PipelineError> {
        let timeout = Duration::from_secs(self.config.env_stage_timeout_secs);
        let result = match tokio::time::timeout(timeout, self.env_stage.run(env_task)).await {
            Ok(result) => result,
            Err(_) => Err(EnvStageError::Timeout(timeout)),
        };

        match result {
            Ok(output) => {
                self.status
                    .set_status(&env_task.job_id, &JobState::done(output.scene_glb.clone()))
                    .await?;
                Ok(PipelineOutcome::Done {
                    scene_glb: output.scene_glb,
                })
            }
            Err(e) => self.fail(&env_task.job_id, PipelineStage::EnvGen, e.to_string()).await,
        }
    }

    async fn fail(
        &self,
        job_id: &JobId,
        stage: PipelineStage,
        message: String,
    ) -> Result<PipelineOutcome, PipelineError> {
        tracing::error!(job_id = %job_id, %stage, error = %message, "Pipeline stage failed");
        self.status
            .set_status(job_id, &JobState::failed(stage, message.clone()))
            .await?;
        Ok(PipelineOutcome::Failed { stage, message })
    }
}
