use backon::ExponentialBuilder;
use std::time::Duration;

use crate::config::Config;

/// Backoff for throttled or unavailable provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_times: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

/// Poll cadence for provider state transitions.
#[derive(Debug, Clone)]
pub struct WaiterPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_wait: Duration,
}

/// Everything a pass needs from configuration, resolved once.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub requests_per_second: u32,
    pub memo_max_capacity: u64,
    pub retry: RetryPolicy,
    pub waiter: WaiterPolicy,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            requests_per_second: cfg.cloud.requests_per_second,
            memo_max_capacity: cfg.engine.memo_max_capacity,
            retry: RetryPolicy {
                max_times: cfg.cloud.retry_max_times,
                min_delay: Duration::from_millis(cfg.cloud.retry_min_delay_ms),
                max_delay: Duration::from_millis(cfg.cloud.retry_max_delay_ms),
            },
            waiter: WaiterPolicy {
                min_delay: cfg.engine.waiter_min_delay(),
                max_delay: cfg.engine.waiter_max_delay(),
                max_wait: cfg.engine.waiter_max_wait(),
            },
        }
    }

    /// Short delays everywhere; meant for tests against the simulated provider.
    pub fn fast() -> Self {
        Self {
            requests_per_second: 1_000,
            memo_max_capacity: 10_000,
            retry: RetryPolicy {
                max_times: 3,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            waiter: WaiterPolicy {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_wait: Duration::from_secs(2),
            },
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
