//! Environment (scene mesh) placeholders.

use std::path::Path;

use fusion_domain::{GenerationOutput, Provenance};
use serde_json::json;

use crate::infrastructure::ports::{GenerationError, GenerationRequest};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;

/// Write a binary glTF holding one empty scene.
pub async fn write_minimal_glb(path: &Path) -> Result<(), GenerationError> {
    let document = json!({
        "asset": {"version": "2.0", "generator": "fusion-stub"},
        "scene": 0,
        "scenes": [{"nodes": []}],
    });
    let mut chunk = serde_json::to_vec(&document)
        .map_err(|e| GenerationError::Failed(e.to_string()))?;
    // Chunks are 4-byte aligned; JSON chunks pad with spaces.
    while chunk.len() % 4 != 0 {
        chunk.push(b' ');
    }

    let chunk_len = u32::try_from(chunk.len())
        .map_err(|_| GenerationError::Failed("glTF JSON chunk too large".to_string()))?;
    let total_len = 12 + 8 + chunk_len;

    let mut bytes = Vec::with_capacity(total_len as usize);
    bytes.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&GLB_VERSION.to_le_bytes());
    bytes.extend_from_slice(&total_len.to_le_bytes());
    bytes.extend_from_slice(&chunk_len.to_le_bytes());
    bytes.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    bytes.extend_from_slice(&chunk);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub(super) async fn generate_stub(
    request: &GenerationRequest,
    name: &str,
    version: &str,
) -> Result<GenerationOutput, GenerationError> {
    let out_dir = request
        .job_root
        .join(format!("env_{}", uuid::Uuid::new_v4().simple()));
    let scene = out_dir.join("scene.glb");
    write_minimal_glb(&scene).await?;

    tracing::debug!(job_id = %request.job_id, path = %scene.display(), "Wrote stub scene");

    let provenance = Provenance::new(name, version)
        .with_attr(
            "components",
            json!({"sdxl": "stub", "triposr": "stub", "zero123pp": "disabled"}),
        )
        .with_attr("theme", request.plan.environment.theme.clone());
    Ok(GenerationOutput::single(
        "scene_glb",
        scene.to_string_lossy(),
        provenance,
    ))
}

pub(super) async fn generate_fast(
    request: &GenerationRequest,
    name: &str,
    version: &str,
) -> Result<GenerationOutput, GenerationError> {
    let out_dir = request
        .job_root
        .join(format!("env_{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(&out_dir).await?;
    let scene = out_dir.join("scene.glb");
    tokio::fs::write(&scene, b"glTF-stub").await?;

    let provenance = Provenance::new(name, version).with_attr("generator", "stub");
    Ok(GenerationOutput::single(
        "scene_glb",
        scene.to_string_lossy(),
        provenance,
    ))
}
