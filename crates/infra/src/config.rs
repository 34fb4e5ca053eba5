//! Ledger service configuration: serde defaults plus `STOCKLEDGER_*` env overrides.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_ledger::{DEFAULT_RESERVATION_TTL_MINUTES, MAX_RESERVATION_TTL_MINUTES};
use stockledger_observability::{LogFormat, LoggingConfig};
use stockledger_units::{ConversionPolicy, DEFAULT_MAX_CHAIN_DEPTH};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Lifetime of a hold when the caller gives no expiry.
    pub reservation_ttl_minutes: i64,
    pub conversion_policy: ConversionPolicy,
    /// Longest equivalence chain accepted when building the conversion graph.
    pub max_chain_depth: usize,
    pub sweep_interval_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_minutes: DEFAULT_RESERVATION_TTL_MINUTES,
            conversion_policy: ConversionPolicy::Strict,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            sweep_interval_secs: 60,
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by process environment, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, validated. Blank values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = read("STOCKLEDGER_RESERVATION_TTL_MINUTES") {
            config.reservation_ttl_minutes = parse("STOCKLEDGER_RESERVATION_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read("STOCKLEDGER_CONVERSION_POLICY") {
            config.conversion_policy = match value.trim().to_ascii_lowercase().as_str() {
                "strict" => ConversionPolicy::Strict,
                "best_effort" | "best-effort" => ConversionPolicy::BestEffort,
                _ => return Err(invalid("STOCKLEDGER_CONVERSION_POLICY", &value)),
            };
        }
        if let Some(value) = read("STOCKLEDGER_MAX_CHAIN_DEPTH") {
            config.max_chain_depth = parse("STOCKLEDGER_MAX_CHAIN_DEPTH", &value)?;
        }
        if let Some(value) = read("STOCKLEDGER_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = parse("STOCKLEDGER_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read("STOCKLEDGER_LOG_LEVEL") {
            config.logging.level = value.trim().to_string();
        }
        if let Some(value) = read("STOCKLEDGER_LOG_FORMAT") {
            config.logging.format = value
                .parse::<LogFormat>()
                .map_err(|_| invalid("STOCKLEDGER_LOG_FORMAT", &value))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation_ttl_minutes <= 0 {
            return Err(ConfigError::Validation(
                "reservation_ttl_minutes must be greater than zero".to_string(),
            ));
        }
        if self.reservation_ttl_minutes > MAX_RESERVATION_TTL_MINUTES {
            return Err(ConfigError::Validation(format!(
                "reservation_ttl_minutes must not exceed {MAX_RESERVATION_TTL_MINUTES}"
            )));
        }
        if self.max_chain_depth == 0 {
            return Err(ConfigError::Validation(
                "max_chain_depth must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| invalid(key, value))
}
