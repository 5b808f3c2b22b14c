//! LLM planner providers.
//!
//! The provider set is closed: OpenAI-like, Anthropic-like and Together-like
//! endpoints. Which ones are active, and in what order, is decided once at
//! startup from the configured credentials.

mod anthropic;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatibleClient;

use crate::infrastructure::config::PlannerConfig;
use crate::infrastructure::ports::{PlannerError, PlannerProviderPort};
use crate::infrastructure::resilient::{ResilientPlanner, RetryConfig};

const SYSTEM_PROMPT: &str = "You are a scene planner. Output ONLY a JSON object that validates \
against the provided JSON schema. Do not include code fences or commentary. Keep values simple and valid.";

/// Closed set of planner backends behind one capability.
pub enum PlannerProvider {
    OpenAi(OpenAiCompatibleClient),
    Anthropic(AnthropicClient),
    Together(OpenAiCompatibleClient),
}

impl PlannerProvider {
    /// Per-provider retry policy.
    pub fn retry_config(&self) -> RetryConfig {
        match self {
            PlannerProvider::OpenAi(_) => RetryConfig::openai(),
            PlannerProvider::Anthropic(_) => RetryConfig::anthropic(),
            PlannerProvider::Together(_) => RetryConfig::together(),
        }
    }
}

#[async_trait]
impl PlannerProviderPort for PlannerProvider {
    fn name(&self) -> &str {
        match self {
            PlannerProvider::OpenAi(_) => "openai",
            PlannerProvider::Anthropic(_) => "anthropic",
            PlannerProvider::Together(_) => "together",
        }
    }

    async fn propose(&self, prompt: &str, schema: &Value) -> Result<Value, PlannerError> {
        match self {
            PlannerProvider::OpenAi(client) | PlannerProvider::Together(client) => {
                client.propose(prompt, schema).await
            }
            PlannerProvider::Anthropic(client) => client.propose(prompt, schema).await,
        }
    }
}

/// Build the priority-ordered provider list from configuration.
///
/// Order is OpenAI, Anthropic, Together; a provider without an API key is
/// skipped. Every entry is wrapped in its own retry policy.
pub fn build_planner_chain(config: &PlannerConfig) -> Vec<Arc<dyn PlannerProviderPort>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut providers = Vec::new();

    if let Some(creds) = &config.openai {
        providers.push(PlannerProvider::OpenAi(OpenAiCompatibleClient::openai(creds, timeout)));
    }
    if let Some(creds) = &config.anthropic {
        providers.push(PlannerProvider::Anthropic(AnthropicClient::new(creds, timeout)));
    }
    if let Some(creds) = &config.together {
        providers.push(PlannerProvider::Together(OpenAiCompatibleClient::together(creds, timeout)));
    }

    providers
        .into_iter()
        .map(|provider| {
            let retry = provider.retry_config();
            tracing::info!(
                provider = provider.name(),
                max_attempts = retry.max_attempts,
                "Planner provider configured"
            );
            Arc::new(ResilientPlanner::new(Arc::new(provider), retry)) as Arc<dyn PlannerProviderPort>
        })
        .collect()
}

/// User message carrying the serialized schema and the prompt.
fn user_message(schema: &Value, prompt: &str) -> String {
    format!(
        "JSON Schema (output must be a JSON object that validates against this):\n{schema}\n\nUser prompt:\n{prompt}\nReturn only JSON."
    )
}

/// Remove incidental formatting: surrounding whitespace, backtick fences and
/// a leading `json` language tag.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim().trim_matches('`').trim();
    let without_tag = trimmed
        .strip_prefix("json")
        .or_else(|| trimmed.strip_prefix("JSON"))
        .unwrap_or(trimmed);
    without_tag.trim()
}

/// Parse model output as JSON, retrying once with fences stripped.
fn parse_model_json(content: &str) -> Result<Value, PlannerError> {
    serde_json::from_str(content)
        .or_else(|_| serde_json::from_str(strip_code_fences(content)))
        .map_err(PlannerError::parse)
}
