//! Fusion Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fusion_engine::app::{Adapters, App};
use fusion_engine::infrastructure::{
    batch_job::HttpBatchJobClient,
    clock::SystemClock,
    config::{EngineConfig, ServerConfig, WorkerConfig},
    generators::BuiltinGenerators,
    planner::build_planner_chain,
    ports::{ClockPort, EnvQueueTask, PipelineTask},
    queues::{InProcessNotifier, SqliteQueue, DEFAULT_MAX_ATTEMPTS, ENV_QUEUE, ORCHESTRATOR_QUEUE},
    sqlite::open_pool,
    status_store::SqliteStatusStore,
    storage::LocalObjectStore,
};
use fusion_engine::{api, workers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may be started from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fusion_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fusion Engine");

    let config = EngineConfig::from_env()?;
    tracing::info!(
        dispatch_mode = ?config.pipeline.dispatch_mode,
        env_dispatch = ?config.pipeline.env_dispatch,
        role = ?config.workers.role,
        "Configuration loaded"
    );

    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());

    tracing::info!(status_db = %config.stores.status_db, queue_db = %config.stores.queue_db, "Opening SQLite stores");
    let status_pool = open_pool(&config.stores.status_db).await?;
    let queue_pool = if config.stores.queue_db == config.stores.status_db {
        status_pool.clone()
    } else {
        open_pool(&config.stores.queue_db).await?
    };

    let status = Arc::new(SqliteStatusStore::new(status_pool, clock.clone()).await?);
    let lease = Duration::from_secs(config.workers.lease_secs);
    let orchestrator_queue = Arc::new(
        SqliteQueue::<PipelineTask, _>::new(
            queue_pool.clone(),
            ORCHESTRATOR_QUEUE,
            DEFAULT_MAX_ATTEMPTS,
            InProcessNotifier::new(ORCHESTRATOR_QUEUE),
        )
        .await?
        .with_lease(lease),
    );
    let env_queue = Arc::new(
        SqliteQueue::<EnvQueueTask, _>::new(
            queue_pool,
            ENV_QUEUE,
            config.batch.submit_max_attempts.max(DEFAULT_MAX_ATTEMPTS),
            InProcessNotifier::new(ENV_QUEUE),
        )
        .await?
        .with_lease(lease),
    );

    let store = Arc::new(LocalObjectStore::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
        config.storage.signing_secret.clone(),
        clock,
    ));

    let app = Arc::new(App::new(
        Adapters {
            planners: build_planner_chain(&config.planner),
            status,
            store,
            generators: Arc::new(BuiltinGenerators),
            batch: Arc::new(HttpBatchJobClient::new(&config.batch)),
            orchestrator_queue,
            env_queue,
        },
        &config,
    ));

    if config.workers.role.runs_workers() {
        spawn_workers(&app, &config.workers);
    }

    if !config.workers.role.runs_api() {
        tracing::info!("Worker-only role, HTTP server disabled");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let router = api::http::routes()
        .with_state(app)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.server));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Start the queue consumers and the periodic queue cleanup.
fn spawn_workers(app: &Arc<App>, config: &WorkerConfig) {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let use_cases = &app.use_cases;

    for worker in 0..config.concurrency {
        tokio::spawn(workers::run_pipeline_worker(
            worker,
            app.queues.orchestrator.clone(),
            use_cases.run_pipeline.clone(),
            poll_interval,
        ));
        tokio::spawn(workers::run_env_worker(
            worker,
            app.queues.env.clone(),
            use_cases.process_env.clone(),
            use_cases.submit_batch.clone(),
            poll_interval,
        ));
    }
    tokio::spawn(workers::run_queue_cleanup(
        app.queues.orchestrator.clone(),
        app.queues.env.clone(),
    ));

    tracing::info!(concurrency = config.concurrency, "Queue workers started");
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if config.cors_allow_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allow_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    cors.allow_origin(origins)
}
