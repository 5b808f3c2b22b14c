use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainError;

const MAX_JOB_ID_LEN: usize = 128;

/// Opaque job identifier.
///
/// Job ids end up in file names, object-store keys and batch job names, so
/// only ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id of the form `scn_<32 hex chars>`.
    pub fn new() -> Self {
        Self(format!("scn_{}", Uuid::new_v4().simple()))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_id("job id cannot be empty"));
        }
        if value.len() > MAX_JOB_ID_LEN {
            return Err(DomainError::invalid_id(format!(
                "job id longer than {MAX_JOB_ID_LEN} characters"
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::invalid_id(format!(
                "job id '{value}' contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_parseable() {
        let id = JobId::new();
        assert!(id.as_str().starts_with("scn_"));
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(JobId::parse(id.as_str()).expect("parse"), id);
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("../etc/passwd").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(JobId::parse("x".repeat(129)).is_err());
        assert!(JobId::parse("job-42_ok").is_ok());
    }

    #[test]
    fn deserialization_goes_through_parse() {
        let ok: JobId = serde_json::from_str("\"scn_abc\"").expect("valid id");
        assert_eq!(ok.as_str(), "scn_abc");
        assert!(serde_json::from_str::<JobId>("\"bad id\"").is_err());
    }
}
