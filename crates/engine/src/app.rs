//! Application state and composition.

use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::ports::{
    BatchJobPort, EnvQueueTask, GeneratorRegistryPort, ObjectStorePort, PipelineTask,
    PlannerProviderPort, QueuePort, StatusStorePort,
};
use crate::use_cases::{
    GetJobStatus, PlanScene, PlannerOrchestrator, PresignArtifacts, ProcessEnvTask, RunPipeline,
    ServeArtifact, SubmitBatchJob, SubmitGeneration,
};

/// Concrete adapters chosen at startup.
pub struct Adapters {
    /// Priority-ordered, already wrapped in their retry policies.
    pub planners: Vec<Arc<dyn PlannerProviderPort>>,
    pub status: Arc<dyn StatusStorePort>,
    pub store: Arc<dyn ObjectStorePort>,
    pub generators: Arc<dyn GeneratorRegistryPort>,
    pub batch: Arc<dyn BatchJobPort>,
    pub orchestrator_queue: Arc<dyn QueuePort<PipelineTask>>,
    pub env_queue: Arc<dyn QueuePort<EnvQueueTask>>,
}

/// Main application state.
///
/// Shared by the HTTP handlers (via axum state) and the queue workers.
pub struct App {
    pub use_cases: UseCases,
    pub queues: Queues,
}

pub struct Queues {
    pub orchestrator: Arc<dyn QueuePort<PipelineTask>>,
    pub env: Arc<dyn QueuePort<EnvQueueTask>>,
}

/// Container for all use cases.
pub struct UseCases {
    pub plan_scene: Arc<PlanScene>,
    pub run_pipeline: Arc<RunPipeline>,
    pub process_env: Arc<ProcessEnvTask>,
    pub submit_batch: Arc<SubmitBatchJob>,
    pub submit_generation: SubmitGeneration,
    pub job_status: GetJobStatus,
    pub presign: PresignArtifacts,
    pub serve_artifact: ServeArtifact,
}

impl App {
    pub fn new(adapters: Adapters, config: &EngineConfig) -> Self {
        let orchestrator = Arc::new(PlannerOrchestrator::new(adapters.planners));
        if !orchestrator.is_configured() {
            tracing::warn!("No planner credentials configured; every plan will use the fallback planner");
        }
        let plan_scene = Arc::new(PlanScene::new(orchestrator, config.planner.strict));

        let process_env = Arc::new(ProcessEnvTask::new(
            adapters.status.clone(),
            adapters.store.clone(),
            adapters.generators,
            config.pipeline.job_tmp_dir.clone(),
        ));
        let run_pipeline = Arc::new(RunPipeline::new(
            plan_scene.clone(),
            adapters.status.clone(),
            adapters.env_queue.clone(),
            process_env.clone(),
            config.pipeline.clone(),
        ));
        let submit_batch = Arc::new(SubmitBatchJob::new(
            adapters.batch.clone(),
            config.batch.clone(),
        ));

        let mode = config.pipeline.dispatch_mode;
        let use_cases = UseCases {
            plan_scene,
            run_pipeline,
            process_env,
            submit_batch,
            submit_generation: SubmitGeneration::new(
                mode,
                adapters.status.clone(),
                adapters.orchestrator_queue.clone(),
                adapters.env_queue.clone(),
            ),
            job_status: GetJobStatus::new(mode, adapters.status, adapters.batch),
            presign: PresignArtifacts::new(
                adapters.store.clone(),
                config.storage.key_layouts.clone(),
                Duration::from_secs(config.storage.presign_ttl_secs),
            ),
            serve_artifact: ServeArtifact::new(adapters.store),
        };

        Self {
            use_cases,
            queues: Queues {
                orchestrator: adapters.orchestrator_queue,
                env: adapters.env_queue,
            },
        }
    }
}
