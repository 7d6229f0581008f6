use serde::{Deserialize, Serialize};

/// Which provider implementation backs region clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderKind {
    #[default]
    Simulated,
}

/// Provider account settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    /// Provider backing region clients.
    /// TOML: `cloud.provider`. Default: `simulated`.
    #[serde(default)]
    pub provider: CloudProviderKind,

    /// Regions enabled for a target when `connect` names none.
    /// TOML: `cloud.default_regions`. Default: `["us-east-1"]`.
    #[serde(default = "default_regions")]
    pub default_regions: Vec<String>,

    /// Provider requests per second allowed per region client.
    /// TOML: `cloud.requests_per_second`. Default: `20`.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Max retry attempts for throttled or unavailable provider calls.
    /// TOML: `cloud.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// First retry delay in milliseconds; grows exponentially.
    /// TOML: `cloud.retry_min_delay_ms`. Default: `200`.
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,

    /// Upper bound for a single retry delay in milliseconds.
    /// TOML: `cloud.retry_max_delay_ms`. Default: `5000`.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProviderKind::default(),
            default_regions: default_regions(),
            requests_per_second: default_requests_per_second(),
            retry_max_times: default_retry_max_times(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_regions() -> Vec<String> {
    vec!["us-east-1".to_string()]
}

fn default_requests_per_second() -> u32 {
    20
}

fn default_retry_max_times() -> usize {
    3
}

fn default_retry_min_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}
