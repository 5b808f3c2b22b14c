//! Providers, artifacts and the manifest that ties them to a job.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DomainError, JobId};

/// Capability a provider implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Env,
    Motion,
    Audio,
    Planner,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Env => "env",
            Stage::Motion => "motion",
            Stage::Audio => "audio",
            Stage::Planner => "planner",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(Stage::Env),
            "motion" => Ok(Stage::Motion),
            "audio" => Ok(Stage::Audio),
            "planner" => Ok(Stage::Planner),
            other => Err(DomainError::parse(format!("unknown stage: {other}"))),
        }
    }
}

/// `(stage, name)` pair addressing one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderKey {
    pub stage: Stage,
    pub name: String,
}

impl ProviderKey {
    pub fn new(stage: Stage, name: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.into(),
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.name)
    }
}

/// Which provider and version produced an artifact, plus free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Provenance {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Artifacts written by one provider invocation, keyed by artifact kind
/// (`scene_glb`, `anim_fbx`, `music_mp3`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub artifacts: BTreeMap<String, String>,
    pub provenance: Provenance,
}

impl GenerationOutput {
    pub fn single(kind: impl Into<String>, location: impl Into<String>, provenance: Provenance) -> Self {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(kind.into(), location.into());
        Self {
            artifacts,
            provenance,
        }
    }
}

/// Persisted record linking a job to everything it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: JobId,
    pub prompt: String,
    pub artifacts: BTreeMap<String, String>,
    pub provenance: BTreeMap<String, Provenance>,
}

impl JobManifest {
    pub fn new(job_id: JobId, prompt: impl Into<String>) -> Self {
        Self {
            job_id,
            prompt: prompt.into(),
            artifacts: BTreeMap::new(),
            provenance: BTreeMap::new(),
        }
    }

    /// Merge one stage's output into the manifest.
    pub fn record(&mut self, stage: Stage, output: GenerationOutput) {
        self.artifacts.extend(output.artifacts);
        self.provenance
            .insert(stage.as_str().to_string(), output.provenance);
    }

    /// Note that an optional stage ran and failed, under `{stage}_error`.
    pub fn record_failure(&mut self, key: &ProviderKey, version: &str, message: impl Into<String>) {
        self.provenance.insert(
            format!("{}_error", key.stage),
            Provenance::new(key.name.clone(), version).with_attr("error", message.into()),
        );
    }

    pub fn scene_glb(&self) -> Option<&str> {
        self.artifacts.get("scene_glb").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provenance_flattens_extra_attributes() {
        let prov = Provenance::new("stub", "0.1.0").with_attr("generator", "stub");
        assert_eq!(
            serde_json::to_value(&prov).expect("ser"),
            json!({"name": "stub", "version": "0.1.0", "generator": "stub"})
        );
    }

    #[test]
    fn manifest_has_canonical_shape() {
        let job_id = JobId::parse("scn_abc").expect("id");
        let mut manifest = JobManifest::new(job_id, "alley");
        manifest.record(
            Stage::Env,
            GenerationOutput::single("scene_glb", "jobs/scn_abc/scene.glb", Provenance::new("stub", "0.1.0")),
        );
        manifest.record_failure(&ProviderKey::new(Stage::Audio, "musicgen_small"), "1.1.0", "boom");

        assert_eq!(manifest.scene_glb(), Some("jobs/scn_abc/scene.glb"));
        assert_eq!(
            serde_json::to_value(&manifest).expect("ser"),
            json!({
                "job_id": "scn_abc",
                "prompt": "alley",
                "artifacts": {"scene_glb": "jobs/scn_abc/scene.glb"},
                "provenance": {
                    "env": {"name": "stub", "version": "0.1.0"},
                    "audio_error": {"name": "musicgen_small", "version": "1.1.0", "error": "boom"}
                }
            })
        );
    }

    #[test]
    fn provider_key_displays_stage_and_name() {
        assert_eq!(ProviderKey::new(Stage::Env, "stub").to_string(), "env/stub");
        assert_eq!("motion".parse::<Stage>().expect("stage"), Stage::Motion);
    }
}
