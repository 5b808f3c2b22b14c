//! Use cases: the job pipeline and the request-tier operations around it.

pub mod artifacts;
pub mod dispatch;
pub mod jobs;
pub mod pipeline;
pub mod planning;

pub use artifacts::{ArtifactError, PresignArtifacts, ServeArtifact};
pub use dispatch::{EnvStageError, ProcessEnvTask, SubmitBatchJob, SubmitOutcome};
pub use jobs::{GetJobStatus, JobError, JobStatusView, SubmitGeneration};
pub use pipeline::{PipelineError, PipelineOutcome, RunPipeline};
pub use planning::{PlanOutcome, PlanScene, PlannerOrchestrator, PlanningError};
