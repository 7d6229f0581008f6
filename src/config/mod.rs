mod basic;
mod cloud;
mod engine;

pub use basic::BasicConfig;
pub use cloud::{CloudConfig, CloudProviderKind};
pub use engine::EngineConfig;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Provider account and request pacing (see `cloud` table in config.toml).
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Reconciliation pass tuning (see `engine` table in config.toml).
    #[serde(default)]
    pub engine: EngineConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present.
    ///
    /// Note: this does **not** validate required fields like `basic.api_key`. Binaries should
    /// call `Config::from_toml()` instead.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration from the TOML file (with defaults) and validates required fields.
    pub fn from_toml() -> Self {
        if !PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            panic!("config file not found: {DEFAULT_CONFIG_FILE}");
        }
        let cfg: Self = Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration from {DEFAULT_CONFIG_FILE}: {err}")
        });
        if cfg.basic.api_key.trim().is_empty() {
            panic!("basic.api_key must be set and non-empty");
        }
        if cfg.engine.waiter_min_delay_ms > cfg.engine.waiter_max_delay_ms {
            panic!("engine.waiter_min_delay_ms must not exceed engine.waiter_max_delay_ms");
        }
        cfg
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_extract_without_file() {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(cfg.basic.listen_port, 8190);
        assert_eq!(cfg.cloud.provider, CloudProviderKind::Simulated);
        assert_eq!(cfg.cloud.default_regions, vec!["us-east-1".to_string()]);
        assert_eq!(cfg.engine.waiter_max_wait_secs, 600);
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [basic]
                api_key = 12345
                data_dir = "/tmp/stratus"

                [cloud]
                default_regions = ["eu-west-1", "us-west-2"]
                requests_per_second = 5

                [engine]
                waiter_max_wait_secs = 30
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.basic.api_key, "12345");
        assert_eq!(cfg.basic.data_dir.to_str(), Some("/tmp/stratus"));
        assert_eq!(cfg.cloud.default_regions.len(), 2);
        assert_eq!(cfg.cloud.requests_per_second, 5);
        assert_eq!(cfg.cloud.retry_max_times, 3);
        assert_eq!(cfg.engine.waiter_max_wait_secs, 30);
        assert_eq!(cfg.engine.waiter_min_delay_ms, 1_000);
    }
}
