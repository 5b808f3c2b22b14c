//! Anthropic messages API client

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_model_json, user_message, SYSTEM_PROMPT};
use crate::infrastructure::config::ProviderCredentials;
use crate::infrastructure::ports::PlannerError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1200;

#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(creds: &ProviderCredentials, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: creds.base_url.clone(),
            api_key: creds.api_key.clone(),
            model: creds.model.clone(),
        }
    }

    pub async fn propose(&self, prompt: &str, schema: &Value) -> Result<Value, PlannerError> {
        let api_request = MessagesRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            max_tokens: MAX_TOKENS,
            temperature: 0.2,
            messages: vec![UserMessage {
                role: "user".to_string(),
                content: user_message(schema, prompt),
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&api_request)
            .send()
            .await
            .map_err(PlannerError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Transport(format!("HTTP {status}: {error_text}")));
        }

        let api_response: MessagesResponse = response.json().await.map_err(|e| {
            PlannerError::Provider(format!("unexpected response shape: {e}"))
        })?;

        parse_model_json(&collect_text(&api_response)?)
    }
}

/// Concatenate every `text` block of the reply.
fn collect_text(response: &MessagesResponse) -> Result<String, PlannerError> {
    let mut text = String::new();
    for block in response.content.iter().filter(|b| b.r#type == "text") {
        let part = block
            .text
            .as_deref()
            .ok_or_else(|| PlannerError::provider("text block without text"))?;
        text.push_str(part);
    }
    if text.is_empty() {
        return Err(PlannerError::provider("no text blocks in response"));
    }
    Ok(text)
}

// =============================================================================
// Messages API types
// =============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<UserMessage>,
}

#[derive(Debug, Serialize)]
struct UserMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}
