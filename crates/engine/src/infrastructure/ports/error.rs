//! Error types for port operations.

use fusion_domain::ValidationError;

/// Failure of a single planner provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlannerError {
    /// Network failure or non-2xx HTTP status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// 2xx response with an unexpected shape.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The returned text was not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Valid JSON that does not satisfy the ScenePlan schema.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl PlannerError {
    pub fn transport(message: impl ToString) -> Self {
        Self::Transport(message.to_string())
    }

    pub fn provider(message: impl ToString) -> Self {
        Self::Provider(message.to_string())
    }

    pub fn parse(message: impl ToString) -> Self {
        Self::Parse(message.to_string())
    }

    /// Transport and provider failures may be transient. Parse and
    /// validation failures are systematic and retrying will not fix them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Provider(_))
    }
}

/// Status store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    /// Database operation failed - includes operation name for tracing.
    #[error("Database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StatusStoreError {
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

/// Errors that can occur during queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Signature mismatch for {0}")]
    BadSignature(String),

    #[error("Link for {0} has expired")]
    Expired(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for errors caused by the caller's link rather than the store.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::BadSignature(_) | Self::Expired(_))
    }
}

/// Generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Unknown provider {stage}/{name}")]
    UnknownProvider { stage: String, name: String },

    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Generation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote batch service errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchJobError {
    /// 429 or 503 from the batch service.
    #[error("Batch service throttled the request: {0}")]
    Throttled(String),

    /// A job with this name was already submitted.
    #[error("Batch job already exists: {0}")]
    AlreadyExists(String),

    #[error("Batch service unreachable: {0}")]
    Transport(String),

    #[error("Batch service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Batch job not found: {0}")]
    NotFound(String),

    #[error("Batch service is not configured")]
    NotConfigured,
}

impl BatchJobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_provider_errors_retry() {
        assert!(PlannerError::transport("timeout").is_retryable());
        assert!(PlannerError::provider("no choices").is_retryable());
        assert!(!PlannerError::parse("eof").is_retryable());
        assert!(!PlannerError::Validation(ValidationError::single("camera", "field required"))
            .is_retryable());
    }

    #[test]
    fn batch_errors_retry_on_throttle_and_transport() {
        assert!(BatchJobError::Throttled("429".into()).is_retryable());
        assert!(BatchJobError::Transport("reset".into()).is_retryable());
        assert!(!BatchJobError::AlreadyExists("scn_1".into()).is_retryable());
        assert!(!BatchJobError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
    }
}
