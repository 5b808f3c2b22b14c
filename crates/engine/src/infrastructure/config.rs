//! Engine configuration
//!
//! Read once from the environment at startup and passed down by value.
//! Malformed numbers fall back to their default with a warning; malformed
//! mode selectors are startup errors.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};

use super::queues::DEFAULT_LEASE;

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
    pub stores: StoreConfig,
    pub pipeline: PipelineConfig,
    pub workers: WorkerConfig,
    pub storage: StorageConfig,
    pub batch: BatchConfig,
    pub server: ServerConfig,
}

/// Credentials and endpoint of one planner provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub openai: Option<ProviderCredentials>,
    pub anthropic: Option<ProviderCredentials>,
    pub together: Option<ProviderCredentials>,
    /// Per-request timeout for every provider
    pub timeout_secs: u64,
    /// Surface provider exhaustion instead of using the rule-based planner
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub status_db: String,
    pub queue_db: String,
}

/// Where generation work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Plan, then generate on the local `env` queue workers.
    Local,
    /// Submit a managed batch job per request; status is polled live.
    Remote,
}

/// How the pipeline hands off to the env stage in local mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvDispatch {
    /// Enqueue and return; the env worker writes the final status.
    Async,
    /// Run the stage inline, bounded by `env_stage_timeout_secs`.
    Sync,
}

/// Which loops this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    All,
    Api,
    Worker,
}

impl EngineRole {
    pub fn runs_api(self) -> bool {
        matches!(self, EngineRole::All | EngineRole::Api)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, EngineRole::All | EngineRole::Worker)
    }
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DispatchMode::Local),
            "remote" => Ok(DispatchMode::Remote),
            other => bail!("DISPATCH_MODE must be 'local' or 'remote', got '{other}'"),
        }
    }
}

impl FromStr for EnvDispatch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" => Ok(EnvDispatch::Async),
            "sync" => Ok(EnvDispatch::Sync),
            other => bail!("ENV_DISPATCH must be 'async' or 'sync', got '{other}'"),
        }
    }
}

impl FromStr for EngineRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(EngineRole::All),
            "api" => Ok(EngineRole::Api),
            "worker" => Ok(EngineRole::Worker),
            other => bail!("ENGINE_ROLE must be 'all', 'api' or 'worker', got '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dispatch_mode: DispatchMode,
    pub env_dispatch: EnvDispatch,
    pub env_stage_timeout_secs: u64,
    /// Scratch root for plans and generated artifacts
    pub job_tmp_dir: PathBuf,
    pub env_provider: String,
    pub env_provider_version: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub role: EngineRole,
    /// Concurrent consumers per queue
    pub concurrency: usize,
    /// Recovery poll interval when no in-process notification arrives
    pub poll_interval_ms: u64,
    /// Claim duration before an unacknowledged queue item is redelivered
    pub lease_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
    pub signing_secret: String,
    pub presign_ttl_secs: u64,
    /// Key prefixes probed in order, with `{job_id}` substituted
    pub key_layouts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub image_uri: String,
    pub role_arn: String,
    pub instance_type: String,
    pub volume_gb: u32,
    pub max_runtime_secs: u64,
    /// Output location handed to batch jobs as `out_bucket`
    pub output_uri: String,
    pub submit_max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS allowed origins (or "*" for any)
    pub cors_allow_origins: Vec<String>,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let status_db = env.string_or("STATUS_DB", "fusion.db");
        let storage_root = PathBuf::from(env.string_or("STORAGE_ROOT", "./storage"));

        let signing_secret = match env.non_empty("STORAGE_SIGNING_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "STORAGE_SIGNING_SECRET not set, using a random per-process secret; \
                     presigned links will not survive a restart"
                );
                uuid::Uuid::new_v4().simple().to_string()
            }
        };

        Ok(Self {
            planner: PlannerConfig {
                openai: env.provider(
                    "OPENAI_API_KEY",
                    ("OPENAI_MODEL", "gpt-4o-mini"),
                    ("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                ),
                anthropic: env.provider(
                    "ANTHROPIC_API_KEY",
                    ("ANTHROPIC_MODEL", "claude-3-5-sonnet-20240620"),
                    ("ANTHROPIC_BASE_URL", "https://api.anthropic.com/v1/messages"),
                ),
                together: env.provider(
                    "TOGETHER_API_KEY",
                    ("TOGETHER_MODEL", "meta-llama-3.1-70b-instruct"),
                    ("TOGETHER_BASE_URL", "https://api.together.xyz/v1/chat/completions"),
                ),
                timeout_secs: env.number_or("PLANNER_TIMEOUT_SECS", 60),
                strict: env.flag("PLANNER_STRICT"),
            },

            stores: StoreConfig {
                queue_db: env.string_or("QUEUE_DB", &status_db),
                status_db,
            },

            pipeline: PipelineConfig {
                dispatch_mode: env.parsed_or("DISPATCH_MODE", DispatchMode::Local)?,
                env_dispatch: env.parsed_or("ENV_DISPATCH", EnvDispatch::Async)?,
                env_stage_timeout_secs: env.number_or("ENV_STAGE_TIMEOUT_SECS", 60),
                job_tmp_dir: PathBuf::from(env.string_or("JOB_TMP_DIR", "/tmp/fusion")),
                env_provider: env.string_or("ENV_PROVIDER", "stub"),
                env_provider_version: env.string_or("ENV_PROVIDER_VERSION", "0.1.0"),
            },

            workers: WorkerConfig {
                role: env.parsed_or("ENGINE_ROLE", EngineRole::All)?,
                concurrency: env.number_or("WORKER_CONCURRENCY", 2usize).max(1),
                poll_interval_ms: env.number_or("WORKER_POLL_INTERVAL_MS", 1000),
                lease_secs: env
                    .number_or("QUEUE_LEASE_SECS", DEFAULT_LEASE.as_secs())
                    .max(1),
            },

            storage: StorageConfig {
                public_base_url: env
                    .string_or("STORAGE_PUBLIC_BASE_URL", "http://localhost:8000/v1/artifacts")
                    .trim_end_matches('/')
                    .to_string(),
                signing_secret,
                presign_ttl_secs: env.number_or("PRESIGN_TTL_SECS", 3600),
                key_layouts: env.list_or(
                    "STORAGE_KEY_LAYOUTS",
                    &["jobs/{job_id}", "{job_id}", "outputs/{job_id}"],
                ),
                root: storage_root.clone(),
            },

            batch: BatchConfig {
                api_url: env.non_empty("BATCH_API_URL"),
                api_token: env.non_empty("BATCH_API_TOKEN"),
                image_uri: env.string_or("BATCH_IMAGE_URI", ""),
                role_arn: env.string_or("BATCH_ROLE_ARN", ""),
                instance_type: env.string_or("BATCH_INSTANCE_TYPE", "ml.g5.xlarge"),
                volume_gb: env.number_or("BATCH_VOLUME_GB", 50),
                max_runtime_secs: env.number_or("BATCH_MAX_RUNTIME_SECS", 3600),
                output_uri: env.string_or("BATCH_OUTPUT_URI", &storage_root.to_string_lossy()),
                submit_max_attempts: env.number_or("BATCH_SUBMIT_MAX_ATTEMPTS", 5u32).max(1),
            },

            server: ServerConfig {
                host: env.string_or("SERVER_HOST", "0.0.0.0"),
                port: env
                    .non_empty("SERVER_PORT")
                    .or_else(|| env.non_empty("PORT"))
                    .map(|raw| parse_or_warn("SERVER_PORT", &raw, 8000))
                    .unwrap_or(8000),
                cors_allow_origins: env.list_or("CORS_ALLOW_ORIGINS", &["*"]),
            },
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.non_empty(key).unwrap_or_else(|| default.to_string())
    }

    fn number_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.non_empty(key) {
            Some(raw) => parse_or_warn(key, &raw, default),
            None => default,
        }
    }

    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr<Err = anyhow::Error>,
    {
        match self.non_empty(key) {
            Some(raw) => raw.parse(),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.non_empty(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    fn list_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        let items: Vec<String> = match self.non_empty(key) {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        };
        if items.is_empty() {
            default.iter().map(|s| (*s).to_string()).collect()
        } else {
            items
        }
    }

    fn provider(
        &self,
        key_var: &str,
        (model_var, model_default): (&str, &str),
        (url_var, url_default): (&str, &str),
    ) -> Option<ProviderCredentials> {
        let api_key = self.non_empty(key_var)?;
        Some(ProviderCredentials {
            api_key,
            model: self.string_or(model_var, model_default),
            base_url: self.string_or(url_var, url_default),
        })
    }
}

fn parse_or_warn<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = raw, default = %default, "Invalid numeric setting, using default");
        default
    })
}
