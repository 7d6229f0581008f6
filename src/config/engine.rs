use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciliation pass tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// First delay between waiter polls, in milliseconds.
    /// TOML: `engine.waiter_min_delay_ms`. Default: `1000`.
    #[serde(default = "default_waiter_min_delay_ms")]
    pub waiter_min_delay_ms: u64,

    /// Largest delay between waiter polls, in milliseconds.
    /// TOML: `engine.waiter_max_delay_ms`. Default: `4000`.
    #[serde(default = "default_waiter_max_delay_ms")]
    pub waiter_max_delay_ms: u64,

    /// Total time a waiter may spend before the record times out.
    /// TOML: `engine.waiter_max_wait_secs`. Default: `600`.
    #[serde(default = "default_waiter_max_wait_secs")]
    pub waiter_max_wait_secs: u64,

    /// Records kept in the per-pass memo.
    /// TOML: `engine.memo_max_capacity`. Default: `100000`.
    #[serde(default = "default_memo_max_capacity")]
    pub memo_max_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waiter_min_delay_ms: default_waiter_min_delay_ms(),
            waiter_max_delay_ms: default_waiter_max_delay_ms(),
            waiter_max_wait_secs: default_waiter_max_wait_secs(),
            memo_max_capacity: default_memo_max_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn waiter_min_delay(&self) -> Duration {
        Duration::from_millis(self.waiter_min_delay_ms)
    }

    pub fn waiter_max_delay(&self) -> Duration {
        Duration::from_millis(self.waiter_max_delay_ms.max(self.waiter_min_delay_ms))
    }

    pub fn waiter_max_wait(&self) -> Duration {
        Duration::from_secs(self.waiter_max_wait_secs)
    }
}

fn default_waiter_min_delay_ms() -> u64 {
    1_000
}

fn default_waiter_max_delay_ms() -> u64 {
    4_000
}

fn default_waiter_max_wait_secs() -> u64 {
    600
}

fn default_memo_max_capacity() -> u64 {
    100_000
}
