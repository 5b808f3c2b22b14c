use serde::{Deserialize, Serialize};

fn default_seed() -> u64 {
    42
}

/// Body of `POST /v1/plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub prompt: String,
    /// Accepted for client compatibility; planning is not seeded.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Body of `POST /v1/generations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
}

/// Payload carried by a remote batch job in its `PROMPT_JSON` variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingPayload {
    pub prompt: String,
    /// Output location prefix, e.g. `s3://bucket/outputs` or a local directory.
    pub out_bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_request_seed_defaults() {
        let req: PlanRequest = serde_json::from_str(r#"{"prompt":"alley"}"#).expect("parse");
        assert_eq!(req.seed, 42);
    }

    #[test]
    fn processing_payload_job_id_is_optional() {
        let payload: ProcessingPayload =
            serde_json::from_str(r#"{"prompt":"p","out_bucket":"/tmp/out"}"#).expect("parse");
        assert_eq!(payload.job_id, None);
        assert_eq!(
            serde_json::to_string(&payload).expect("ser"),
            r#"{"prompt":"p","out_bucket":"/tmp/out"}"#
        );
    }
}
