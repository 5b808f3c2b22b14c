//! Fusion domain library.
//!
//! Pure types shared by the engine and the batch processing entrypoint.
//!
//! ## Structure
//!
//! - `scene_plan/` - the structured scene description, its validator and the
//!   rule-based fallback planner
//! - `job` - job lifecycle states and the transition rules between them
//! - `provenance` - providers, generation outputs and job manifests
//! - `ids` - opaque job identifiers

pub mod error;
pub mod ids;
pub mod job;
pub mod provenance;
pub mod scene_plan;

pub use error::{DomainError, FieldViolation, ValidationError};
pub use ids::JobId;
pub use job::{JobState, JobStatus, PipelineStage, StatusDetail};
pub use provenance::{GenerationOutput, JobManifest, Provenance, ProviderKey, Stage};
pub use scene_plan::{
    fallback_plan, scene_plan_schema, validate_scene_plan, AudioSpec, CameraPath, CameraSpec,
    CharacterSpec, DurationSecs, EnvSpec, Instances, ObjectSpec, Rig, ScenePlan, Tempo, TimeOfDay,
    Weather, MAX_OBJECTS,
};
