//! In-memory job status store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use fusion_domain::{JobId, JobState};
use tokio::sync::RwLock;

use crate::infrastructure::ports::{StatusStoreError, StatusStorePort};

#[derive(Default)]
pub struct InMemoryStatusStore {
    states: RwLock<HashMap<JobId, JobState>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStorePort for InMemoryStatusStore {
    async fn set_status(&self, job_id: &JobId, state: &JobState) -> Result<bool, StatusStoreError> {
        let mut states = self.states.write().await;
        if let Some(current) = states.get(job_id) {
            if !current.status.can_transition_to(state.status) {
                tracing::debug!(
                    job_id = %job_id,
                    from = %current.status,
                    to = %state.status,
                    "Ignored non-monotonic status write"
                );
                return Ok(false);
            }
        }
        states.insert(job_id.clone(), state.clone());
        Ok(true)
    }

    async fn get_status(&self, job_id: &JobId) -> Result<Option<JobState>, StatusStoreError> {
        Ok(self.states.read().await.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_domain::JobStatus;

    #[tokio::test]
    async fn done_is_final() {
        let store = InMemoryStatusStore::new();
        let job = JobId::new();

        store.set_status(&job, &JobState::env_done("a.glb", Default::default())).await.expect("set");
        store.set_status(&job, &JobState::done("a.glb")).await.expect("set");
        let ignored = store.set_status(&job, &JobState::env_gen()).await.expect("set");

        assert!(!ignored);
        let state = store.get_status(&job).await.expect("get").expect("present");
        assert_eq!(state.status, JobStatus::Done);
    }
}
