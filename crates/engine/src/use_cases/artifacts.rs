//! Presigned download links and signed artifact serving.

use std::sync::Arc;
use std::time::Duration;

use fusion_domain::{DomainError, JobId};
use fusion_shared::PresignedUrlsResponse;

use crate::infrastructure::ports::{ObjectStorePort, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("No artifacts found for job {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidId(#[from] DomainError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Find a job's artifacts under any known key layout and presign them.
///
/// Layouts are tried in order; the first holding a `manifest.json` wins.
pub struct PresignArtifacts {
    store: Arc<dyn ObjectStorePort>,
    layouts: Vec<String>,
    ttl: Duration,
}

impl PresignArtifacts {
    pub fn new(store: Arc<dyn ObjectStorePort>, layouts: Vec<String>, ttl: Duration) -> Self {
        Self {
            store,
            layouts,
            ttl,
        }
    }

    pub async fn execute(&self, job_id: &str) -> Result<PresignedUrlsResponse, ArtifactError> {
        let job_id = JobId::parse(job_id)?;

        for layout in &self.layouts {
            let prefix = layout.replace("{job_id}", job_id.as_str());
            let manifest_key = format!("{prefix}/manifest.json");

            match self.store.exists(&manifest_key).await {
                Ok(true) => {
                    tracing::debug!(job_id = %job_id, layout = %layout, "Artifacts found");
                    return Ok(PresignedUrlsResponse {
                        job_id: job_id.to_string(),
                        manifest_url: self.store.presign(&manifest_key, self.ttl)?,
                        scene_url: self.store.presign(&format!("{prefix}/scene.glb"), self.ttl)?,
                        layout: layout.clone(),
                        expires_in: self.ttl.as_secs(),
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, layout = %layout, error = %e, "Layout probe failed");
                }
            }
        }

        Err(ArtifactError::NotFound(job_id.to_string()))
    }
}

/// Return an object's bytes if its signed link is valid.
pub struct ServeArtifact {
    store: Arc<dyn ObjectStorePort>,
}

impl ServeArtifact {
    pub fn new(store: Arc<dyn ObjectStorePort>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> Result<Vec<u8>, StorageError> {
        self.store.verify(key, expires, signature)?;
        self.store.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::ports::MockObjectStorePort;
    use crate::infrastructure::storage::LocalObjectStore;

    fn layouts() -> Vec<String> {
        vec![
            "jobs/{job_id}".to_string(),
            "{job_id}".to_string(),
            "outputs/{job_id}".to_string(),
        ]
    }

    fn local_store(dir: &tempfile::TempDir) -> Arc<LocalObjectStore> {
        Arc::new(LocalObjectStore::new(
            dir.path(),
            "http://localhost:8000/v1/artifacts",
            "secret",
            Arc::new(SystemClock::new()),
        ))
    }

    #[tokio::test]
    async fn later_layout_is_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = local_store(&dir);
        store
            .put("outputs/scn_1/manifest.json", b"{}".to_vec())
            .await
            .expect("put");
        let use_case = PresignArtifacts::new(store, layouts(), Duration::from_secs(600));

        let response = use_case.execute("scn_1").await.expect("presign");

        assert_eq!(response.layout, "outputs/{job_id}");
        assert_eq!(response.expires_in, 600);
        assert!(response
            .manifest_url
            .starts_with("http://localhost:8000/v1/artifacts/outputs/scn_1/manifest.json?"));
        assert!(response.scene_url.contains("outputs/scn_1/scene.glb?"));
    }

    #[tokio::test]
    async fn no_matching_layout_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let use_case = PresignArtifacts::new(local_store(&dir), layouts(), Duration::from_secs(600));

        let err = use_case.execute("scn_missing").await.expect_err("none");
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn failing_probe_moves_to_next_layout() {
        let mut store = MockObjectStorePort::new();
        store.expect_exists().returning(|key| {
            if key.starts_with("jobs/") {
                Err(StorageError::Io(std::io::Error::other("disk offline")))
            } else {
                Ok(key == "scn_2/manifest.json")
            }
        });
        store
            .expect_presign()
            .returning(|key, _| Ok(format!("signed://{key}")));
        let use_case = PresignArtifacts::new(Arc::new(store), layouts(), Duration::from_secs(60));

        let response = use_case.execute("scn_2").await.expect("presign");
        assert_eq!(response.layout, "{job_id}");
        assert_eq!(response.manifest_url, "signed://scn_2/manifest.json");
    }

    #[tokio::test]
    async fn serve_requires_valid_signature() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = local_store(&dir);
        store.put("jobs/scn_1/scene.glb", b"glTF".to_vec()).await.expect("put");
        let serve = ServeArtifact::new(store);

        let err = serve
            .execute("jobs/scn_1/scene.glb", i64::MAX, "deadbeef")
            .await
            .expect_err("bad signature");
        assert!(err.is_forbidden());
    }
}
