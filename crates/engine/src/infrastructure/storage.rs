//! Filesystem-backed object store with HMAC-style signed download links.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::infrastructure::ports::{ClockPort, ObjectStorePort, StorageError};

/// Objects live at `root/<key>`; links point at `public_base/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
    secret: String,
    clock: Arc<dyn ClockPort>,
}

impl LocalObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base: impl Into<String>,
        secret: impl Into<String>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"|");
        hasher.update(key.as_bytes());
        hasher.update(b"|");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl ObjectStorePort for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(key, "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = self.clock.now().timestamp().saturating_add(ttl_secs);
        let signature = self.sign(key, expires);
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_base, key, expires, signature
        ))
    }

    fn verify(&self, key: &str, expires: i64, signature: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let expected = self.sign(key, expires);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(StorageError::BadSignature(key.to_string()));
        }
        if self.clock.now().timestamp() > expires {
            return Err(StorageError::Expired(key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn store(root: &Path) -> LocalObjectStore {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("time");
        LocalObjectStore::new(root, "http://localhost:8000/v1/artifacts/", "secret", Arc::new(FixedClock(now)))
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|part| part.strip_prefix(&format!("{name}=")))
            .expect("param")
    }

    #[tokio::test]
    async fn put_then_get_creates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());

        store.put("jobs/scn_1/manifest.json", b"{}".to_vec()).await.expect("put");

        assert!(store.exists("jobs/scn_1/manifest.json").await.expect("exists"));
        assert!(!store.exists("jobs/scn_2/manifest.json").await.expect("exists"));
        assert_eq!(store.get("jobs/scn_1/manifest.json").await.expect("get"), b"{}");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = store(dir.path()).get("jobs/none").await.expect_err("missing");
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        for key in ["../etc/passwd", "jobs/../../x", "/abs", "", "a//b"] {
            assert!(
                matches!(store.presign(key, Duration::from_secs(60)), Err(StorageError::InvalidKey(_))),
                "{key} accepted"
            );
        }
    }

    #[test]
    fn presigned_link_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());

        let url = store.presign("jobs/scn_1/scene.glb", Duration::from_secs(3600)).expect("presign");
        assert!(url.starts_with("http://localhost:8000/v1/artifacts/jobs/scn_1/scene.glb?expires="));

        let expires: i64 = query_param(&url, "expires").parse().expect("expires");
        let signature = query_param(&url, "signature");
        store.verify("jobs/scn_1/scene.glb", expires, signature).expect("valid");
    }

    #[test]
    fn tampered_and_expired_links_are_forbidden() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let url = store.presign("jobs/scn_1/scene.glb", Duration::from_secs(60)).expect("presign");
        let expires: i64 = query_param(&url, "expires").parse().expect("expires");
        let signature = query_param(&url, "signature");

        let err = store.verify("jobs/scn_2/scene.glb", expires, signature).expect_err("other key");
        assert!(matches!(err, StorageError::BadSignature(_)));
        assert!(err.is_forbidden());

        let stale = expires - 120;
        let stale_signature = store.sign("jobs/scn_1/scene.glb", stale);
        let err = store.verify("jobs/scn_1/scene.glb", stale, &stale_signature).expect_err("expired");
        assert!(matches!(err, StorageError::Expired(_)));
    }
}
