//! Job lifecycle
//!
//! A job moves forward through ordered states and never back. `done` and
//! `error` are terminal; `error` is reachable from any non-terminal state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DomainError, Provenance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Planning,
    Planned,
    EnvGen,
    EnvQueued,
    EnvDone,
    Done,
    Error,
}

impl JobStatus {
    /// Position in the lifecycle. Writes may only keep or raise it.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Planning => 1,
            JobStatus::Planned => 2,
            JobStatus::EnvGen => 3,
            JobStatus::EnvQueued => 4,
            JobStatus::EnvDone => 5,
            JobStatus::Done => 6,
            JobStatus::Error => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether a record currently at `self` may be overwritten with `next`.
    ///
    /// Rewriting the same status is allowed so duplicate deliveries are
    /// harmless; terminal records are frozen.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Planning => "planning",
            JobStatus::Planned => "planned",
            JobStatus::EnvGen => "env_gen",
            JobStatus::EnvQueued => "env_queued",
            JobStatus::EnvDone => "env_done",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "planning" => Ok(JobStatus::Planning),
            "planned" => Ok(JobStatus::Planned),
            "env_gen" => Ok(JobStatus::EnvGen),
            "env_queued" => Ok(JobStatus::EnvQueued),
            "env_done" => Ok(JobStatus::EnvDone),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            other => Err(DomainError::parse(format!("unknown job status: {other}"))),
        }
    }
}

/// Stage named in an `error` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Planning,
    EnvGen,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Planning => "planning",
            PipelineStage::EnvGen => "env_gen",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional payload stored next to the status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_glb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<BTreeMap<String, Provenance>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusDetail {
    pub fn is_empty(&self) -> bool {
        *self == StatusDetail::default()
    }
}

/// Latest status of a job plus its detail payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    #[serde(default)]
    pub detail: StatusDetail,
}

impl JobState {
    fn bare(status: JobStatus) -> Self {
        Self {
            status,
            detail: StatusDetail::default(),
        }
    }

    pub fn queued() -> Self {
        Self::bare(JobStatus::Queued)
    }

    pub fn planning() -> Self {
        Self::bare(JobStatus::Planning)
    }

    pub fn planned(plan_path: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Planned,
            detail: StatusDetail {
                plan_path: Some(plan_path.into()),
                ..Default::default()
            },
        }
    }

    pub fn env_gen() -> Self {
        Self::bare(JobStatus::EnvGen)
    }

    pub fn env_queued(task_id: impl Into<String>) -> Self {
        Self {
            status: JobStatus::EnvQueued,
            detail: StatusDetail {
                task_id: Some(task_id.into()),
                ..Default::default()
            },
        }
    }

    pub fn env_done(
        scene_glb: impl Into<String>,
        provenance: BTreeMap<String, Provenance>,
    ) -> Self {
        Self {
            status: JobStatus::EnvDone,
            detail: StatusDetail {
                scene_glb: Some(scene_glb.into()),
                provenance: Some(provenance),
                ..Default::default()
            },
        }
    }

    pub fn done(scene_glb: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Done,
            detail: StatusDetail {
                scene_glb: Some(scene_glb.into()),
                ..Default::default()
            },
        }
    }

    pub fn failed(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            detail: StatusDetail {
                stage: Some(stage),
                message: Some(message.into()),
                ..Default::default()
            },
        }
    }
}
