use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use std::{fmt, time::Duration};
use stratus_cloud::CloudError;
use thiserror::Error as ThisError;

use super::{IsRetryable, registry::RegistryError};

#[derive(Debug, ThisError)]
pub enum StratusError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Provider error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Inbound request without a valid API key.
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    /// A referenced record exists on neither side; the referencing record is skipped.
    #[error("Unresolved reference: {0}")]
    Unresolved(String),

    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("{0}")]
    Reconcile(FailureSummary),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

impl StratusError {
    pub fn validation(message: impl Into<String>) -> Self {
        StratusError::Validation(message.into())
    }

    pub fn unresolved(message: impl Into<String>) -> Self {
        StratusError::Unresolved(message.into())
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, StratusError::Unresolved(_))
    }

    /// Provider failures that make every later call in the pass pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StratusError::Cloud(err) if err.is_fatal())
    }
}

impl IsRetryable for StratusError {
    fn is_retryable(&self) -> bool {
        match self {
            StratusError::Cloud(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Merged per-record failures of one reconciliation pass.
///
/// Messages are de-duplicated in first-seen order; the most recent failure is kept whole.
#[derive(Debug, Default)]
pub struct FailureSummary {
    messages: Vec<String>,
    failures: usize,
    last: Option<Box<StratusError>>,
}

impl FailureSummary {
    pub fn push(&mut self, context: &str, error: StratusError) {
        let message = format!("{context}: {error}");
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
        self.failures += 1;
        self.last = Some(Box::new(error));
    }

    pub fn merge(&mut self, other: FailureSummary) {
        for message in other.messages {
            if !self.messages.contains(&message) {
                self.messages.push(message);
            }
        }
        self.failures += other.failures;
        if other.last.is_some() {
            self.last = other.last;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures == 0
    }

    /// Number of failed records, duplicates included.
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// The last concrete failure, kept for diagnostics.
    pub fn last(&self) -> Option<&StratusError> {
        self.last.as_deref()
    }
}

impl fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages.join("\n"))
    }
}

impl Serialize for FailureSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("FailureSummary", 3)?;
        state.serialize_field("failures", &self.failures)?;
        state.serialize_field("messages", &self.messages)?;
        state.serialize_field("last", &self.last.as_ref().map(ToString::to_string))?;
        state.end()
    }
}

impl IntoResponse for StratusError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            StratusError::Registry(err) => {
                let status = match &err {
                    RegistryError::Collision(_) => StatusCode::CONFLICT,
                    RegistryError::Hook(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    RegistryError::DependencyCycle(_)
                    | RegistryError::UnknownDependency { .. }
                    | RegistryError::DuplicateModule(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_REQUEST,
                };
                let body = ApiErrorObject {
                    code: err.code().to_string(),
                    message: err.to_string(),
                    details: None,
                };
                (status, body)
            }

            StratusError::Validation(message) => {
                let status = StatusCode::BAD_REQUEST;
                let body = ApiErrorObject {
                    code: "VALIDATION_ERROR".to_string(),
                    message,
                    details: None,
                };
                (status, body)
            }

            StratusError::UnknownTarget(target) => {
                let status = StatusCode::NOT_FOUND;
                let body = ApiErrorObject {
                    code: "UNKNOWN_TARGET".to_string(),
                    message: format!("Target '{target}' is not connected."),
                    details: None,
                };
                (status, body)
            }

            StratusError::Unauthorized(reason) => {
                let status = StatusCode::UNAUTHORIZED;
                let body = ApiErrorObject {
                    code: "UNAUTHORIZED".to_string(),
                    message: reason.to_string(),
                    details: None,
                };
                (status, body)
            }

            StratusError::Cloud(err) => {
                let status = match &err {
                    CloudError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    CloudError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
                    CloudError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::BAD_GATEWAY,
                };
                let body = ApiErrorObject {
                    code: "PROVIDER_ERROR".to_string(),
                    message: err.to_string(),
                    details: Some(Value::String(err.code().to_string())),
                };
                (status, body)
            }

            StratusError::Timeout { what, waited } => {
                let status = StatusCode::GATEWAY_TIMEOUT;
                let body = ApiErrorObject {
                    code: "WAITER_TIMEOUT".to_string(),
                    message: format!("Timed out after {waited:?} waiting for {what}."),
                    details: None,
                };
                (status, body)
            }

            StratusError::Reconcile(summary) => {
                let status = StatusCode::CONFLICT;
                let body = ApiErrorObject {
                    code: "RECONCILE_FAILED".to_string(),
                    message: summary.to_string(),
                    details: serde_json::to_value(&summary).ok(),
                };
                (status, body)
            }

            StratusError::Unresolved(message) => {
                let status = StatusCode::CONFLICT;
                let body = ApiErrorObject {
                    code: "UNRESOLVED_REFERENCE".to_string(),
                    message,
                    details: None,
                };
                (status, body)
            }

            StratusError::DatabaseError(_)
            | StratusError::JsonError(_)
            | StratusError::IoError(_)
            | StratusError::RactorError(_)
            | StratusError::UnexpectedError(_) => {
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = ApiErrorObject {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                    details: None,
                };
                (status, body)
            }
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_dedupes_and_keeps_last() {
        let mut summary = FailureSummary::default();
        summary.push("vpc", StratusError::validation("cidr missing"));
        summary.push("vpc", StratusError::validation("cidr missing"));
        summary.push(
            "topic",
            StratusError::Cloud(CloudError::InvalidParameter("bad name".into())),
        );

        assert_eq!(summary.failures(), 3);
        assert_eq!(summary.messages().len(), 2);
        assert_eq!(
            summary.to_string(),
            "vpc: Validation error: cidr missing\ntopic: Provider error: invalid parameter: bad name"
        );
        assert!(matches!(summary.last(), Some(StratusError::Cloud(_))));
    }

    #[test]
    fn only_transient_provider_errors_retry() {
        assert!(StratusError::Cloud(CloudError::Throttled("x".into())).is_retryable());
        assert!(!StratusError::Cloud(CloudError::Internal("x".into())).is_retryable());
        assert!(!StratusError::validation("x").is_retryable());
    }
}
