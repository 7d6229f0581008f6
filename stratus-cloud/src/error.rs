use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a region-scoped provider client.
///
/// `code` mirrors the provider's error code vocabulary so callers can log it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "message")]
pub enum CloudError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("region not enabled: {0}")]
    RegionNotEnabled(String),

    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal provider error: {0}")]
    Internal(String),
}

impl CloudError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CloudError::NotFound { .. } => "NotFound",
            CloudError::InvalidParameter(_) => "InvalidParameterValue",
            CloudError::Throttled(_) => "Throttling",
            CloudError::Unauthorized(_) => "AuthFailure",
            CloudError::RegionNotEnabled(_) => "OptInRequired",
            CloudError::DependencyViolation(_) => "DependencyViolation",
            CloudError::ServiceUnavailable(_) => "ServiceUnavailable",
            CloudError::Internal(_) => "InternalError",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Transient conditions worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::Throttled(_) | CloudError::ServiceUnavailable(_)
        )
    }

    /// Errors that invalidate the whole client rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CloudError::Unauthorized(_) | CloudError::RegionNotEnabled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_is_transient_auth_is_fatal() {
        assert!(CloudError::Throttled("rate".into()).is_transient());
        assert!(CloudError::ServiceUnavailable("down".into()).is_transient());
        assert!(!CloudError::InvalidParameter("cidr".into()).is_transient());

        assert!(CloudError::Unauthorized("bad key".into()).is_fatal());
        assert!(!CloudError::not_found("vpc", "vpc-1").is_fatal());
    }

    #[test]
    fn serializes_with_code_tag() {
        let err = CloudError::DependencyViolation("subnet in use".into());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "DependencyViolation");
        assert_eq!(value["message"], "subnet in use");
    }
}
