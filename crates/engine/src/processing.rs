//! Batch job entrypoint logic.
//!
//! A managed batch job receives a [`ProcessingPayload`], generates the
//! environment through a fallback chain of providers and writes the manifest
//! and scene under `outputs/{job_id}/` of its output location.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fusion_domain::{
    AudioSpec, CameraSpec, DomainError, EnvSpec, JobId, JobManifest, ScenePlan, Stage, TimeOfDay,
    Weather,
};
use fusion_shared::ProcessingPayload;

use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::ports::{
    GenerationError, GenerationRequest, GeneratorRegistryPort, ObjectStorePort, StorageError,
};
use crate::infrastructure::storage::LocalObjectStore;

pub const OUTPUT_PREFIX: &str = "outputs";
const LAST_RESORT_PROVIDER: &str = "stub";

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Invalid PROMPT_JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidId(#[from] DomainError),

    #[error("Every environment strategy failed, last: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub struct ProcessingResult {
    pub job_id: JobId,
    /// `{out_bucket}/outputs/{job_id}`
    pub location: String,
    pub manifest: JobManifest,
}

/// Night scene themed after the prompt, with default camera and audio.
pub fn minimal_plan(prompt: &str) -> ScenePlan {
    ScenePlan {
        environment: EnvSpec {
            theme: prompt.to_string(),
            weather: Weather::None,
            time_of_day: TimeOfDay::Night,
        },
        objects: Vec::new(),
        character: None,
        camera: CameraSpec::default(),
        audio: AudioSpec::default(),
    }
}

/// Local directory behind an output location (`file://` is optional).
pub fn output_root(out_bucket: &str) -> PathBuf {
    PathBuf::from(out_bucket.strip_prefix("file://").unwrap_or(out_bucket))
}

/// Strategies tried in order: the configured provider, then `stub`.
fn strategies(preferred: &str) -> Vec<&str> {
    let mut chain = vec![preferred];
    if preferred != LAST_RESORT_PROVIDER {
        chain.push(LAST_RESORT_PROVIDER);
    }
    chain
}

pub struct ProcessPayload {
    generators: Arc<dyn GeneratorRegistryPort>,
    env_provider: String,
    work_dir: PathBuf,
}

impl ProcessPayload {
    pub fn new(
        generators: Arc<dyn GeneratorRegistryPort>,
        env_provider: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generators,
            env_provider: env_provider.into(),
            work_dir: work_dir.into(),
        }
    }

    pub async fn execute(&self, raw: &str) -> Result<ProcessingResult, ProcessingError> {
        let payload: ProcessingPayload = serde_json::from_str(raw)?;
        let job_id = match payload.job_id.as_deref() {
            Some(id) => JobId::parse(id)?,
            None => JobId::new(),
        };

        let request = GenerationRequest {
            job_id: job_id.clone(),
            job_root: self.work_dir.join(job_id.as_str()),
            prompt: payload.prompt.clone(),
            plan: minimal_plan(&payload.prompt),
        };

        let mut failures: Vec<String> = Vec::new();
        let mut last_error = None;
        let mut generated = None;
        for name in strategies(&self.env_provider) {
            let attempt = match self.generators.resolve(Stage::Env, name) {
                Ok(provider) => provider.generate(&request).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(output) => {
                    generated = Some((name, output));
                    break;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, strategy = name, error = %e, "Environment strategy failed");
                    failures.push(format!("{name}: {e}"));
                    last_error = Some(e);
                }
            }
        }

        let Some((strategy, mut output)) = generated else {
            return Err(last_error
                .unwrap_or_else(|| GenerationError::Failed("no strategy ran".to_string()))
                .into());
        };
        output.provenance = output.provenance.with_attr("strategy", strategy);
        if !failures.is_empty() {
            output.provenance = output.provenance.with_attr("fallback_errors", failures);
        }

        let local_scene = output
            .artifacts
            .remove("scene_glb")
            .ok_or_else(|| GenerationError::Failed("provider returned no scene_glb".to_string()))?;

        let store = LocalObjectStore::new(
            output_root(&payload.out_bucket),
            payload.out_bucket.clone(),
            "",
            Arc::new(SystemClock::new()),
        );
        let prefix = format!("{OUTPUT_PREFIX}/{job_id}");
        let scene_key = format!("{prefix}/scene.glb");

        let scene = tokio::fs::read(Path::new(&local_scene))
            .await
            .map_err(GenerationError::from)?;
        store.put(&scene_key, scene).await?;

        let mut manifest = JobManifest::new(job_id.clone(), payload.prompt);
        manifest.record(Stage::Env, output);
        manifest.artifacts.insert("scene_glb".to_string(), scene_key);
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| GenerationError::Failed(e.to_string()))?;
        store
            .put(&format!("{prefix}/manifest.json"), manifest_json)
            .await?;

        let location = format!(
            "{}/{prefix}",
            payload.out_bucket.trim_end_matches('/')
        );
        tracing::info!(job_id = %job_id, strategy, location = %location, "Batch job finished");

        Ok(ProcessingResult {
            job_id,
            location,
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::generators::BuiltinGenerators;
    use serde_json::json;

    fn processor(dir: &tempfile::TempDir, provider: &str) -> ProcessPayload {
        ProcessPayload::new(Arc::new(BuiltinGenerators), provider, dir.path().join("work"))
    }

    #[tokio::test]
    async fn writes_manifest_and_scene_under_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("bucket");
        let raw = json!({
            "prompt": "harbor at dusk",
            "out_bucket": format!("file://{}", out.display()),
            "job_id": "scn_batch1",
        })
        .to_string();

        let result = processor(&dir, "stub").execute(&raw).await.expect("process");

        assert_eq!(result.job_id.as_str(), "scn_batch1");
        assert!(result.location.ends_with("/outputs/scn_batch1"));
        assert!(out.join("outputs/scn_batch1/scene.glb").exists());

        let manifest: serde_json::Value = serde_json::from_slice(
            &std::fs::read(out.join("outputs/scn_batch1/manifest.json")).expect("manifest"),
        )
        .expect("json");
        assert_eq!(manifest["artifacts"]["scene_glb"], "outputs/scn_batch1/scene.glb");
        assert_eq!(manifest["provenance"]["env"]["strategy"], "stub");
        assert!(manifest["provenance"]["env"].get("fallback_errors").is_none());
    }

    #[tokio::test]
    async fn unknown_provider_falls_back_to_stub() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = json!({
            "prompt": "desert ruins",
            "out_bucket": dir.path().join("bucket").display().to_string(),
        })
        .to_string();

        let result = processor(&dir, "hunyuan3d").execute(&raw).await.expect("process");

        assert!(result.job_id.as_str().starts_with("scn_"));
        let env = &result.manifest.provenance["env"];
        assert_eq!(env.name, "stub");
        assert_eq!(env.extra["strategy"], "stub");
        let errors = env.extra["fallback_errors"].as_array().expect("errors");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].as_str().expect("str").starts_with("hunyuan3d:"));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = processor(&dir, "stub")
            .execute("{\"prompt\": 3}")
            .await
            .expect_err("bad payload");
        assert!(matches!(err, ProcessingError::Payload(_)));
    }

    #[test]
    fn minimal_plan_is_a_valid_night_scene() {
        let plan = minimal_plan("neon market");
        assert_eq!(plan.environment.theme, "neon market");
        assert_eq!(plan.environment.time_of_day, TimeOfDay::Night);
        assert!(plan.check().is_ok());
    }
}
