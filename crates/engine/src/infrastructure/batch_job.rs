//! HTTP client for the managed batch processing service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::infrastructure::config::BatchConfig;
use crate::infrastructure::ports::{BatchJobError, BatchJobPort, BatchJobRequest, BatchJobState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to `{api_url}/jobs`. Without an `api_url` every call fails with
/// [`BatchJobError::NotConfigured`].
pub struct HttpBatchJobClient {
    client: Client,
    api_url: Option<String>,
    api_token: Option<String>,
}

impl HttpBatchJobClient {
    pub fn new(config: &BatchConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: config
                .api_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_token: config.api_token.clone(),
        }
    }

    fn base(&self) -> Result<&str, BatchJobError> {
        self.api_url.as_deref().ok_or(BatchJobError::NotConfigured)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Map a non-2xx submission response onto the retry taxonomy.
fn classify_submit_failure(status: StatusCode, name: &str, body: String) -> BatchJobError {
    match status {
        StatusCode::CONFLICT => BatchJobError::AlreadyExists(name.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            BatchJobError::Throttled(format!("HTTP {status}: {body}"))
        }
        _ => BatchJobError::Rejected {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl BatchJobPort for HttpBatchJobClient {
    async fn submit(&self, request: &BatchJobRequest) -> Result<(), BatchJobError> {
        let url = format!("{}/jobs", self.base()?);

        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| BatchJobError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(job_name = %request.name, "Submitted batch job");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_submit_failure(status, &request.name, body))
    }

    async fn describe(&self, name: &str) -> Result<BatchJobState, BatchJobError> {
        let url = format!("{}/jobs/{}", self.base()?, name);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BatchJobError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BatchJobError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchJobError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let api_response: DescribeResponse = response.json().await.map_err(|e| {
            BatchJobError::Rejected {
                status: status.as_u16(),
                message: format!("unexpected response shape: {e}"),
            }
        })?;

        Ok(BatchJobState {
            name: api_response.name.unwrap_or_else(|| name.to_string()),
            status: api_response.status,
            failure_reason: api_response.failure_reason,
        })
    }
}

// =============================================================================
// Batch service API types
// =============================================================================

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    name: Option<String>,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}
