//! OpenAI-compatible chat completions client (OpenAI and Together)

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_model_json, user_message, SYSTEM_PROMPT};
use crate::infrastructure::config::ProviderCredentials;
use crate::infrastructure::ports::PlannerError;

const TEMPERATURE: f32 = 0.2;

/// Client for `/chat/completions` style endpoints.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    /// Request `response_format: json_object` (OpenAI only).
    json_mode: bool,
}

impl OpenAiCompatibleClient {
    /// OpenAI: `base_url` is the API root, `/chat/completions` is appended.
    pub fn openai(creds: &ProviderCredentials, timeout: Duration) -> Self {
        let endpoint = format!("{}/chat/completions", creds.base_url.trim_end_matches('/'));
        Self::build(endpoint, creds, timeout, true)
    }

    /// Together: `base_url` is the full completions endpoint.
    pub fn together(creds: &ProviderCredentials, timeout: Duration) -> Self {
        Self::build(creds.base_url.clone(), creds, timeout, false)
    }

    fn build(endpoint: String, creds: &ProviderCredentials, timeout: Duration, json_mode: bool) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint,
            api_key: creds.api_key.clone(),
            model: creds.model.clone(),
            json_mode,
        }
    }

    pub async fn propose(&self, prompt: &str, schema: &Value) -> Result<Value, PlannerError> {
        let api_request = self.build_request(prompt, schema);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(PlannerError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Transport(format!("HTTP {status}: {error_text}")));
        }

        let api_response: ChatResponse = response.json().await.map_err(|e| {
            PlannerError::Provider(format!("unexpected response shape: {e}"))
        })?;

        let content = extract_content(api_response)?;
        parse_model_json(&content)
    }

    fn build_request(&self, prompt: &str, schema: &Value) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user_message(schema, prompt)),
                },
            ],
            response_format: self.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
            temperature: TEMPERATURE,
        }
    }
}

fn extract_content(response: ChatResponse) -> Result<String, PlannerError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PlannerError::provider("no choices in response"))?;

    choice
        .message
        .content
        .ok_or_else(|| PlannerError::provider("choice has no message content"))
}

// =============================================================================
// Chat completions API types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatChoice {
    message: ChatMessage,
}
