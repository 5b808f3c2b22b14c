//! Generation stage dispatch: local environment generation and remote batch
//! submission.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fusion_domain::{
    validate_scene_plan, JobId, JobManifest, JobState, JobStatus, PipelineStage, Provenance,
    ScenePlan, Stage,
};
use fusion_shared::ProcessingPayload;

use crate::infrastructure::config::BatchConfig;
use crate::infrastructure::ports::{
    BatchJobError, BatchJobPort, BatchJobRequest, BatchSubmitTask, EnvTask, GenerationError,
    GenerationRequest, GeneratorRegistryPort, ObjectStorePort, StatusStoreError, StatusStorePort,
    StorageError,
};
use crate::infrastructure::resilient::RetryConfig;

const MOTION_PROVIDER: &str = "mdm_base";
const AUDIO_PROVIDER: &str = "musicgen_small";

/// Object key of a job's manifest under the primary layout.
pub fn manifest_key(job_id: &JobId) -> String {
    format!("jobs/{job_id}/manifest.json")
}

/// Object key of a job's scene under the primary layout.
pub fn scene_key(job_id: &JobId) -> String {
    format!("jobs/{job_id}/scene.glb")
}

/// Failure of the environment stage. Always terminal for the job.
#[derive(Debug, thiserror::Error)]
pub enum EnvStageError {
    #[error("Plan unreadable: {0}")]
    Plan(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Environment stage timed out after {0:?}")]
    Timeout(Duration),
}

/// What a successful environment stage produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStageOutput {
    /// Object key of the uploaded scene.
    pub scene_glb: String,
    pub provenance: BTreeMap<String, Provenance>,
}

/// Run the environment stage for one job, then the optional motion and
/// audio stages, and upload the results.
pub struct ProcessEnvTask {
    status: Arc<dyn StatusStorePort>,
    store: Arc<dyn ObjectStorePort>,
    generators: Arc<dyn GeneratorRegistryPort>,
    job_tmp_dir: PathBuf,
}

impl ProcessEnvTask {
    pub fn new(
        status: Arc<dyn StatusStorePort>,
        store: Arc<dyn ObjectStorePort>,
        generators: Arc<dyn GeneratorRegistryPort>,
        job_tmp_dir: PathBuf,
    ) -> Self {
        Self {
            status,
            store,
            generators,
            job_tmp_dir,
        }
    }

    /// Worker entry point: run the stage and own the terminal status write.
    ///
    /// Only status store failures are returned; stage failures become
    /// `error{env_gen}`. A job that already got past this stage is left as is.
    pub async fn execute(&self, task: &EnvTask) -> Result<JobState, StatusStoreError> {
        if let Some(current) = self.status.get_status(&task.job_id).await? {
            if current.status.rank() >= JobStatus::EnvDone.rank() {
                tracing::info!(job_id = %task.job_id, status = %current.status, "Environment stage already finished, skipping");
                return Ok(current);
            }
        }

        let state = match self.run(task).await {
            Ok(output) => JobState::env_done(output.scene_glb, output.provenance),
            Err(e) => {
                tracing::error!(job_id = %task.job_id, stage = "env_gen", error = %e, "Environment stage failed");
                JobState::failed(PipelineStage::EnvGen, e.to_string())
            }
        };
        self.status.set_status(&task.job_id, &state).await?;
        Ok(state)
    }

    /// Generate and upload without touching the status store.
    pub async fn run(&self, task: &EnvTask) -> Result<EnvStageOutput, EnvStageError> {
        let plan = load_plan(&task.plan_path).await?;
        let request = GenerationRequest {
            job_id: task.job_id.clone(),
            job_root: self.job_tmp_dir.join(task.job_id.as_str()),
            prompt: task.prompt.clone(),
            plan,
        };
        let mut manifest = JobManifest::new(task.job_id.clone(), task.prompt.clone());

        let env = self.generators.resolve(Stage::Env, &task.provider)?;
        if env.version() != task.version {
            tracing::warn!(
                job_id = %task.job_id,
                provider = %env.key(),
                requested = %task.version,
                available = env.version(),
                "Requested provider version differs from installed version"
            );
        }
        let env_output = env.generate(&request).await?;
        let local_scene = env_output
            .artifacts
            .get("scene_glb")
            .cloned()
            .ok_or_else(|| GenerationError::Failed("provider returned no scene_glb".to_string()))?;
        manifest.record(Stage::Env, env_output);
        tracing::info!(job_id = %task.job_id, provider = %env.key(), "Environment generated");

        if request.plan.character.is_some() {
            self.run_optional(Stage::Motion, MOTION_PROVIDER, &request, &mut manifest)
                .await;
        }
        self.run_optional(Stage::Audio, AUDIO_PROVIDER, &request, &mut manifest)
            .await;

        let scene_bytes = tokio::fs::read(&local_scene)
            .await
            .map_err(GenerationError::from)?;
        let scene_glb = scene_key(&task.job_id);
        self.store.put(&scene_glb, scene_bytes).await?;
        manifest
            .artifacts
            .insert("scene_glb".to_string(), scene_glb.clone());

        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| GenerationError::Failed(e.to_string()))?;
        self.store
            .put(&manifest_key(&task.job_id), manifest_json)
            .await?;
        discard_scratch(&task.job_id, &request.job_root, Path::new(&task.plan_path)).await;

        Ok(EnvStageOutput {
            scene_glb,
            provenance: manifest.provenance,
        })
    }

    /// Motion and audio never fail the job; failures land in provenance.
    async fn run_optional(
        &self,
        stage: Stage,
        name: &str,
        request: &GenerationRequest,
        manifest: &mut JobManifest,
    ) {
        let provider = match self.generators.resolve(stage, name) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(job_id = %request.job_id, %stage, error = %e, "Optional stage unavailable");
                return;
            }
        };

        match provider.generate(request).await {
            Ok(output) => manifest.record(stage, output),
            Err(e) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    provider = %provider.key(),
                    error = %e,
                    "Optional stage failed"
                );
                manifest.record_failure(&provider.key(), provider.version(), e.to_string());
            }
        }
    }
}

/// Drop the job's local working files once their results are uploaded.
async fn discard_scratch(job_id: &JobId, job_root: &Path, plan_path: &Path) {
    let removals = [
        (job_root, tokio::fs::remove_dir_all(job_root).await),
        (plan_path, tokio::fs::remove_file(plan_path).await),
    ];
    for (path, result) in removals {
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, path = %path.display(), error = %e, "Could not remove scratch files");
            }
        }
    }
}

async fn load_plan(path: &str) -> Result<ScenePlan, EnvStageError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EnvStageError::Plan(format!("{path}: {e}")))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| EnvStageError::Plan(e.to_string()))?;
    validate_scene_plan(&value).map_err(|e| EnvStageError::Plan(e.to_string()))
}

// =============================================================================
// Remote batch submission
// =============================================================================

/// Result of one submission attempt; the queue worker acts on it.
#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted,
    /// A job with this name already exists; counts as success.
    AlreadySubmitted,
    /// Transient failure; reschedule the queue item.
    Retry { delay: Duration, error: BatchJobError },
    Failed(BatchJobError),
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Submitted | Self::AlreadySubmitted)
    }
}

/// Submit a managed batch job named after the pipeline job id.
pub struct SubmitBatchJob {
    batch: Arc<dyn BatchJobPort>,
    config: BatchConfig,
    retry: RetryConfig,
}

impl SubmitBatchJob {
    pub fn new(batch: Arc<dyn BatchJobPort>, config: BatchConfig) -> Self {
        let retry = RetryConfig::batch_submit(config.submit_max_attempts);
        Self {
            batch,
            config,
            retry,
        }
    }

    pub fn build_request(&self, task: &BatchSubmitTask) -> Result<BatchJobRequest, serde_json::Error> {
        let payload = ProcessingPayload {
            prompt: task.prompt.clone(),
            out_bucket: self.config.output_uri.clone(),
            job_id: Some(task.job_id.to_string()),
        };
        let mut environment = HashMap::new();
        environment.insert("PROMPT_JSON".to_string(), serde_json::to_string(&payload)?);

        Ok(BatchJobRequest {
            name: task.job_id.to_string(),
            image_uri: self.config.image_uri.clone(),
            role_arn: self.config.role_arn.clone(),
            instance_type: self.config.instance_type.clone(),
            volume_gb: self.config.volume_gb,
            max_runtime_secs: self.config.max_runtime_secs,
            environment,
        })
    }

    /// `attempt` is 1-based and counts this call.
    pub async fn execute(&self, task: &BatchSubmitTask, attempt: u32) -> SubmitOutcome {
        let request = match self.build_request(task) {
            Ok(request) => request,
            Err(e) => return SubmitOutcome::Failed(BatchJobError::Rejected {
                status: 0,
                message: e.to_string(),
            }),
        };

        match self.batch.submit(&request).await {
            Ok(()) => SubmitOutcome::Submitted,
            Err(BatchJobError::AlreadyExists(name)) => {
                tracing::info!(job_id = %task.job_id, job_name = %name, "Batch job already submitted");
                SubmitOutcome::AlreadySubmitted
            }
            Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                let delay = self.retry.calculate_delay(attempt);
                tracing::warn!(
                    job_id = %task.job_id,
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Batch submission failed, rescheduling"
                );
                SubmitOutcome::Retry { delay, error: e }
            }
            Err(e) => {
                tracing::error!(job_id = %task.job_id, attempt, error = %e, "Batch submission failed");
                SubmitOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::generators::BuiltinGenerators;
    use crate::infrastructure::ports::MockBatchJobPort;
    use crate::infrastructure::status_store::InMemoryStatusStore;
    use crate::infrastructure::storage::LocalObjectStore;
    use fusion_domain::fallback_plan;

    struct Fixture {
        dir: tempfile::TempDir,
        plan_path: String,
        status: Arc<InMemoryStatusStore>,
        store: Arc<LocalObjectStore>,
        use_case: ProcessEnvTask,
    }

    async fn fixture(plan: &ScenePlan) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan_path = dir.path().join("plan.json");
        tokio::fs::write(&plan_path, plan.to_canonical_json().expect("json"))
            .await
            .expect("write plan");

        let status = Arc::new(InMemoryStatusStore::new());
        let store = Arc::new(LocalObjectStore::new(
            dir.path().join("storage"),
            "http://localhost/v1/artifacts",
            "secret",
            Arc::new(SystemClock::new()),
        ));
        let use_case = ProcessEnvTask::new(
            status.clone(),
            store.clone(),
            Arc::new(BuiltinGenerators),
            dir.path().join("jobs"),
        );
        Fixture {
            plan_path: plan_path.to_string_lossy().into_owned(),
            dir,
            status,
            store,
            use_case,
        }
    }

    fn env_task(job_id: &JobId, plan_path: &str, provider: &str) -> EnvTask {
        EnvTask {
            job_id: job_id.clone(),
            plan_path: plan_path.to_string(),
            provider: provider.to_string(),
            version: "0.1.0".to_string(),
            prompt: "rainy alley".to_string(),
        }
    }

    #[tokio::test]
    async fn env_stage_uploads_manifest_and_marks_env_done() {
        let fixture = fixture(&fallback_plan("rainy alley")).await;
        let job = JobId::new();

        let state = fixture
            .use_case
            .execute(&env_task(&job, &fixture.plan_path, "stub"))
            .await
            .expect("execute");

        assert_eq!(state.status, JobStatus::EnvDone);
        assert_eq!(state.detail.scene_glb.as_deref(), Some(scene_key(&job).as_str()));
        let provenance = state.detail.provenance.expect("provenance");
        assert!(provenance.contains_key("env"));
        assert!(provenance.contains_key("motion"));
        assert!(provenance.contains_key("audio"));

        let manifest: JobManifest = serde_json::from_slice(
            &fixture.store.get(&manifest_key(&job)).await.expect("manifest"),
        )
        .expect("parse manifest");
        assert_eq!(manifest.job_id, job);
        assert_eq!(manifest.scene_glb(), Some(scene_key(&job).as_str()));
        assert!(fixture.store.exists(&scene_key(&job)).await.expect("exists"));

        let stored = fixture.status.get_status(&job).await.expect("get").expect("state");
        assert_eq!(stored.status, JobStatus::EnvDone);
    }

    #[tokio::test]
    async fn uploaded_job_leaves_no_scratch_files() {
        let fixture = fixture(&fallback_plan("rainy alley")).await;
        let job = JobId::new();

        fixture
            .use_case
            .execute(&env_task(&job, &fixture.plan_path, "stub"))
            .await
            .expect("execute");

        assert!(!fixture.dir.path().join("jobs").join(job.as_str()).exists());
        assert!(!Path::new(&fixture.plan_path).exists());
        assert!(fixture.store.exists(&scene_key(&job)).await.expect("exists"));
    }

    #[tokio::test]
    async fn redelivered_env_task_keeps_finished_state() {
        let fixture = fixture(&fallback_plan("rainy alley")).await;
        let job = JobId::new();
        let task = env_task(&job, &fixture.plan_path, "stub");

        fixture.use_case.execute(&task).await.expect("execute");
        let again = fixture.use_case.execute(&task).await.expect("execute");

        assert_eq!(again.status, JobStatus::EnvDone);
        let stored = fixture.status.get_status(&job).await.expect("get").expect("state");
        assert_eq!(stored.status, JobStatus::EnvDone);
    }

    #[tokio::test]
    async fn motion_is_skipped_without_character() {
        let mut plan = fallback_plan("empty street");
        plan.character = None;
        let fixture = fixture(&plan).await;
        let job = JobId::new();

        let output = fixture
            .use_case
            .run(&env_task(&job, &fixture.plan_path, "triposr_fast"))
            .await
            .expect("run");

        assert!(!output.provenance.contains_key("motion"));
        assert_eq!(output.provenance["env"].name, "sdxl_triposr");
    }

    #[tokio::test]
    async fn unknown_env_provider_fails_job() {
        let fixture = fixture(&fallback_plan("alley")).await;
        let job = JobId::new();

        let state = fixture
            .use_case
            .execute(&env_task(&job, &fixture.plan_path, "nerf_xl"))
            .await
            .expect("execute");

        assert_eq!(state.status, JobStatus::Error);
        assert_eq!(state.detail.stage, Some(PipelineStage::EnvGen));
        assert!(state.detail.message.expect("message").contains("nerf_xl"));
    }

    #[tokio::test]
    async fn missing_plan_fails_job() {
        let fixture = fixture(&fallback_plan("alley")).await;
        let job = JobId::new();

        let state = fixture
            .use_case
            .execute(&env_task(&job, "/nonexistent/plan.json", "stub"))
            .await
            .expect("execute");
        assert_eq!(state.status, JobStatus::Error);
    }

    fn batch_config() -> BatchConfig {
        BatchConfig {
            api_url: Some("http://batch.local".to_string()),
            api_token: None,
            image_uri: "registry/fusion:latest".to_string(),
            role_arn: "arn:role".to_string(),
            instance_type: "ml.g5.xlarge".to_string(),
            volume_gb: 50,
            max_runtime_secs: 3600,
            output_uri: "/srv/outputs".to_string(),
            submit_max_attempts: 3,
        }
    }

    fn submit_task() -> BatchSubmitTask {
        BatchSubmitTask {
            job_id: JobId::parse("scn_abc").expect("id"),
            prompt: "foggy pier".to_string(),
        }
    }

    #[test]
    fn submission_carries_serialized_payload() {
        let use_case = SubmitBatchJob::new(Arc::new(MockBatchJobPort::new()), batch_config());
        let request = use_case.build_request(&submit_task()).expect("request");

        assert_eq!(request.name, "scn_abc");
        let payload: ProcessingPayload =
            serde_json::from_str(&request.environment["PROMPT_JSON"]).expect("payload");
        assert_eq!(payload.prompt, "foggy pier");
        assert_eq!(payload.out_bucket, "/srv/outputs");
        assert_eq!(payload.job_id.as_deref(), Some("scn_abc"));
    }

    #[tokio::test]
    async fn already_exists_counts_as_success() {
        let mut batch = MockBatchJobPort::new();
        batch
            .expect_submit()
            .times(1)
            .returning(|req| Err(BatchJobError::AlreadyExists(req.name.clone())));
        let use_case = SubmitBatchJob::new(Arc::new(batch), batch_config());

        let outcome = use_case.execute(&submit_task(), 1).await;
        assert!(matches!(outcome, SubmitOutcome::AlreadySubmitted));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn throttling_retries_until_attempts_exhausted() {
        let mut batch = MockBatchJobPort::new();
        batch
            .expect_submit()
            .times(2)
            .returning(|_| Err(BatchJobError::Throttled("429".to_string())));
        let use_case = SubmitBatchJob::new(Arc::new(batch), batch_config());

        let first = use_case.execute(&submit_task(), 1).await;
        match first {
            SubmitOutcome::Retry { delay, .. } => {
                assert!(delay >= Duration::from_millis(1000));
                assert!(delay <= Duration::from_millis(1200));
            }
            other => panic!("expected retry, got {other:?}"),
        }

        let last = use_case.execute(&submit_task(), 3).await;
        assert!(matches!(last, SubmitOutcome::Failed(BatchJobError::Throttled(_))));
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let mut batch = MockBatchJobPort::new();
        batch.expect_submit().times(1).returning(|_| {
            Err(BatchJobError::Rejected {
                status: 400,
                message: "bad image".to_string(),
            })
        });
        let use_case = SubmitBatchJob::new(Arc::new(batch), batch_config());

        let outcome = use_case.execute(&submit_task(), 1).await;
        assert!(matches!(outcome, SubmitOutcome::Failed(BatchJobError::Rejected { .. })));
    }
}
