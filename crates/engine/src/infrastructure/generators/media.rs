//! Motion and audio placeholders.

use fusion_domain::{GenerationOutput, Provenance};

use crate::infrastructure::ports::{GenerationError, GenerationRequest};

pub(super) async fn generate_motion(
    request: &GenerationRequest,
    name: &str,
    version: &str,
) -> Result<GenerationOutput, GenerationError> {
    let character = request
        .plan
        .character
        .as_ref()
        .ok_or_else(|| GenerationError::Failed("plan has no character to animate".to_string()))?;

    let out_dir = request
        .job_root
        .join(format!("motion_{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(&out_dir).await?;
    let anim = out_dir.join("anim.fbx");
    tokio::fs::write(&anim, format!("FBX placeholder: {}\n", character.motion_text)).await?;

    let provenance = Provenance::new(name, version)
        .with_attr("motion_text", character.motion_text.clone())
        .with_attr("archetype", character.archetype.clone());
    Ok(GenerationOutput::single("anim_fbx", anim.to_string_lossy(), provenance))
}

pub(super) async fn generate_audio(
    request: &GenerationRequest,
    name: &str,
    version: &str,
) -> Result<GenerationOutput, GenerationError> {
    let audio = &request.plan.audio;
    let out_dir = request
        .job_root
        .join(format!("audio_{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(&out_dir).await?;
    let music = out_dir.join("music.mp3");
    tokio::fs::write(&music, b"ID3").await?;

    let provenance = Provenance::new(name, version)
        .with_attr("tempo", audio.tempo.get())
        .with_attr("mood", audio.mood.clone());
    Ok(GenerationOutput::single("music_mp3", music.to_string_lossy(), provenance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_domain::{fallback_plan, JobId};

    #[tokio::test]
    async fn motion_requires_character() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut plan = fallback_plan("alley");
        plan.character = None;
        let request = GenerationRequest {
            job_id: JobId::new(),
            job_root: dir.path().to_path_buf(),
            prompt: "alley".to_string(),
            plan,
        };

        let err = generate_motion(&request, "mdm_base", "0.9.0").await.expect_err("no character");
        assert!(matches!(err, GenerationError::Failed(_)));
    }

    #[tokio::test]
    async fn audio_records_tempo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = GenerationRequest {
            job_id: JobId::new(),
            job_root: dir.path().to_path_buf(),
            prompt: "alley".to_string(),
            plan: fallback_plan("alley"),
        };

        let output = generate_audio(&request, "musicgen_small", "1.1.0").await.expect("audio");
        assert!(output.artifacts.contains_key("music_mp3"));
        assert_eq!(output.provenance.extra["tempo"], 80);
    }
}
