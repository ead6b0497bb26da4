// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::CacheConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration of the HAProxy SPOA handler.
#[derive(Debug, Clone)]
pub struct HaProxySpoaConfig {
    /// Blocking decisions are only reported, HAProxy is never asked to block.
    pub blocking_unavailable: bool,
    /// Bytes of body analyzed per message; zero or negative disables body
    /// analysis entirely.
    pub body_parsing_size_limit: i64,
    /// Stops the background work of the handler when cancelled.
    pub cancellation: CancellationToken,
    pub cache: CacheConfig,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for HaProxySpoaConfig {
    fn default() -> Self {
        Self {
            blocking_unavailable: false,
            body_parsing_size_limit: 0,
            cancellation: CancellationToken::new(),
            cache: CacheConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl HaProxySpoaConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let blocking_unavailable = env::var("_DD_APPSEC_BLOCKING_UNAVAILABLE")
            .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);
        let body_parsing_size_limit = match env::var("DD_APPSEC_BODY_PARSING_SIZE_LIMIT") {
            Ok(val) => val.trim().parse::<i64>().map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "DD_APPSEC_BODY_PARSING_SIZE_LIMIT must be an integer, got '{val}': {e}"
                ))
            })?,
            Err(_) => defaults.body_parsing_size_limit,
        };
        let default_timeout = duration_from_env(
            "DD_HAPROXY_SPOA_REQUEST_TIMEOUT",
            defaults.cache.default_timeout,
        )?;
        let sweep_interval =
            duration_from_env("DD_HAPROXY_SPOA_SWEEP_INTERVAL", defaults.cache.sweep_interval)?;
        let log_level = env::var("DD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            blocking_unavailable,
            body_parsing_size_limit,
            cancellation: defaults.cancellation,
            cache: CacheConfig {
                default_timeout,
                sweep_interval,
            },
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.default_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "sweep interval must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn duration_from_env(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(val) => humantime::parse_duration(val.trim()).map_err(|e| {
            ConfigError::InvalidConfig(format!("{name} must be a duration such as '1m', got '{val}': {e}"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const ENV_VARS: [&str; 5] = [
        "_DD_APPSEC_BLOCKING_UNAVAILABLE",
        "DD_APPSEC_BODY_PARSING_SIZE_LIMIT",
        "DD_HAPROXY_SPOA_REQUEST_TIMEOUT",
        "DD_HAPROXY_SPOA_SWEEP_INTERVAL",
        "DD_LOG_LEVEL",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HaProxySpoaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.default_timeout, Duration::from_secs(60));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_zero_durations() {
        let config = HaProxySpoaConfig {
            cache: CacheConfig {
                default_timeout: Duration::ZERO,
                ..CacheConfig::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HaProxySpoaConfig {
            cache: CacheConfig {
                sweep_interval: Duration::ZERO,
                ..CacheConfig::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = HaProxySpoaConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("_DD_APPSEC_BLOCKING_UNAVAILABLE", "TRUE");
        env::set_var("DD_APPSEC_BODY_PARSING_SIZE_LIMIT", "131072");
        env::set_var("DD_HAPROXY_SPOA_REQUEST_TIMEOUT", "30s");
        env::set_var("DD_HAPROXY_SPOA_SWEEP_INTERVAL", "250ms");
        env::set_var("DD_LOG_LEVEL", "DEBUG");

        let config = HaProxySpoaConfig::from_env().unwrap();
        clear_env();

        assert!(config.blocking_unavailable);
        assert_eq!(config.body_parsing_size_limit, 131_072);
        assert_eq!(config.cache.default_timeout, Duration::from_secs(30));
        assert_eq!(config.cache.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();

        let config = HaProxySpoaConfig::from_env().unwrap();

        assert!(!config.blocking_unavailable);
        assert_eq!(config.body_parsing_size_limit, 0);
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_invalid_values() {
        clear_env();
        env::set_var("DD_APPSEC_BODY_PARSING_SIZE_LIMIT", "lots");
        assert!(HaProxySpoaConfig::from_env().is_err());

        clear_env();
        env::set_var("DD_HAPROXY_SPOA_REQUEST_TIMEOUT", "forever");
        assert!(HaProxySpoaConfig::from_env().is_err());

        clear_env();
        env::set_var("DD_HAPROXY_SPOA_SWEEP_INTERVAL", "0s");
        assert!(HaProxySpoaConfig::from_env().is_err());

        clear_env();
    }
}
