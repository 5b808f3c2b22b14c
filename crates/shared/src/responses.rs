//! Response bodies returned by the HTTP API

use fusion_domain::{ScenePlan, StatusDetail};
use serde::{Deserialize, Serialize};

/// Status reported when no record exists for a job id.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Body of `GET /` and `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

/// Body of `POST /v1/plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub scene_plan: ScenePlan,
    /// Name of the planner that produced the plan (`openai`, `fallback`, ...).
    pub planner: String,
}

/// Body of `POST /v1/generations`.
///
/// Pipeline mode answers `{job_id, status}`; direct stage submission answers
/// `{task_id, job_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationAccepted {
    Queued { job_id: String, status: String },
    Submitted { task_id: String, job_id: String },
}

impl GenerationAccepted {
    pub fn queued(job_id: impl Into<String>) -> Self {
        Self::Queued {
            job_id: job_id.into(),
            status: "queued".to_string(),
        }
    }

    pub fn submitted(task_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self::Submitted {
            task_id: task_id.into(),
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Queued { job_id, .. } | Self::Submitted { job_id, .. } => job_id,
        }
    }
}

/// Status read from the status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<StatusDetail>,
}

impl JobStatusResponse {
    pub fn unknown(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: UNKNOWN_STATUS.to_string(),
            detail: None,
        }
    }
}

/// Status polled live from the remote batch service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    /// `PENDING`, `SUCCESS`, `FAILURE` or `UNKNOWN`.
    pub state: String,
    pub job_id: String,
    #[serde(rename = "sagemaker_status")]
    pub batch_status: Option<String>,
}

/// Time-limited download links for a job's artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedUrlsResponse {
    pub job_id: String,
    pub manifest_url: String,
    pub scene_url: String,
    /// Key prefix under which the artifacts were found.
    pub layout: String,
    pub expires_in: u64,
}

/// Error body shared by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
