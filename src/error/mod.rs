mod registry;
mod stratus;

pub use registry::{RegistryError, TableCollision};
pub use stratus::{ApiErrorBody, ApiErrorObject, FailureSummary, StratusError};

use stratus_cloud::CloudError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CloudError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}
