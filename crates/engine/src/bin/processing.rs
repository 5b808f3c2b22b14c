//! Fusion batch processing entrypoint.
//!
//! Runs inside a managed batch job: reads `PROMPT_JSON`, generates the scene
//! and prints `{"ok":true,"location":...}` on success.

use std::sync::Arc;

use fusion_engine::infrastructure::generators::BuiltinGenerators;
use fusion_engine::processing::ProcessPayload;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fusion_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let raw = std::env::var("PROMPT_JSON")
        .map_err(|_| anyhow::anyhow!("PROMPT_JSON is not set"))?;
    let env_provider = std::env::var("ENV_PROVIDER").unwrap_or_else(|_| "stub".into());
    let work_dir = std::env::var("JOB_TMP_DIR").unwrap_or_else(|_| "/tmp/fusion".into());

    let result = ProcessPayload::new(Arc::new(BuiltinGenerators), env_provider, work_dir)
        .execute(&raw)
        .await?;

    println!(
        "{}",
        serde_json::json!({"ok": true, "location": result.location})
    );
    Ok(())
}
