//! In-memory application wiring for API and end-to-end tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::app::{Adapters, App};
use crate::infrastructure::batch_job::HttpBatchJobClient;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::generators::BuiltinGenerators;
use crate::infrastructure::ports::{
    BatchJobPort, EnvQueueTask, PipelineTask, PlannerProviderPort,
};
use crate::infrastructure::queues::{
    InMemoryQueue, InProcessNotifier, DEFAULT_MAX_ATTEMPTS, ENV_QUEUE, ORCHESTRATOR_QUEUE,
};
use crate::infrastructure::status_store::InMemoryStatusStore;
use crate::infrastructure::storage::LocalObjectStore;

pub struct TestApp {
    pub app: Arc<App>,
    pub config: EngineConfig,
    pub store: Arc<LocalObjectStore>,
    pub status: Arc<InMemoryStatusStore>,
    _dir: TempDir,
}

/// Local dispatch, async env stage, no planner credentials.
pub fn test_app() -> TestApp {
    test_app_with(&[], Vec::new(), None)
}

/// Build an app from variable overrides plus optional planner and batch fakes.
pub fn test_app_with(
    vars: &[(&str, &str)],
    planners: Vec<Arc<dyn PlannerProviderPort>>,
    batch: Option<Arc<dyn BatchJobPort>>,
) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage_root = dir.path().join("storage").display().to_string();
    let job_tmp_dir = dir.path().join("jobs").display().to_string();

    let mut all: Vec<(String, String)> = vec![
        ("STORAGE_ROOT".to_string(), storage_root),
        ("JOB_TMP_DIR".to_string(), job_tmp_dir),
        ("STORAGE_SIGNING_SECRET".to_string(), "test-secret".to_string()),
    ];
    all.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    let config = EngineConfig::from_lookup(|key| {
        all.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("config");

    let status = Arc::new(InMemoryStatusStore::new());
    let store = Arc::new(LocalObjectStore::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
        config.storage.signing_secret.clone(),
        Arc::new(SystemClock::new()),
    ));
    let batch = batch.unwrap_or_else(|| Arc::new(HttpBatchJobClient::new(&config.batch)));

    let adapters = Adapters {
        planners,
        status: status.clone(),
        store: store.clone(),
        generators: Arc::new(BuiltinGenerators),
        batch,
        orchestrator_queue: Arc::new(InMemoryQueue::<PipelineTask, _>::new(
            ORCHESTRATOR_QUEUE,
            DEFAULT_MAX_ATTEMPTS,
            InProcessNotifier::new(ORCHESTRATOR_QUEUE),
        )),
        env_queue: Arc::new(InMemoryQueue::<EnvQueueTask, _>::new(
            ENV_QUEUE,
            DEFAULT_MAX_ATTEMPTS,
            InProcessNotifier::new(ENV_QUEUE),
        )),
    };

    TestApp {
        app: Arc::new(App::new(adapters, &config)),
        config,
        store,
        status,
        _dir: dir,
    }
}
