// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_HARVEST_ENDPOINT, DEFAULT_HARVEST_INTERVAL, DEFAULT_HARVEST_TIMEOUT};
use crate::error::ConfigError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the harvest pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// License key sent with every harvest
    pub license_key: Option<String>,
    /// Collector base URL
    pub endpoint: String,
    /// Time between scheduled harvests
    pub harvest_interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Agent log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// URL of the monitored page, used as both page and current URL
    pub page_url: Option<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            license_key: None,
            endpoint: DEFAULT_HARVEST_ENDPOINT.to_string(),
            harvest_interval: DEFAULT_HARVEST_INTERVAL,
            timeout: DEFAULT_HARVEST_TIMEOUT,
            https_proxy: None,
            log_level: "info".to_string(),
            page_url: None,
        }
    }
}

impl HarvestConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let license_key = lookup("NR_LICENSE_KEY").filter(|key| !key.trim().is_empty());
        let endpoint = lookup("NR_HARVEST_ENDPOINT")
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .unwrap_or(defaults.endpoint);
        let harvest_interval = match lookup("NR_HARVEST_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(parse_secs("NR_HARVEST_INTERVAL_SECS", &value)?),
            None => defaults.harvest_interval,
        };
        let timeout = match lookup("NR_HARVEST_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_secs("NR_HARVEST_TIMEOUT_SECS", &value)?),
            None => defaults.timeout,
        };
        let https_proxy = lookup("NR_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY"));
        let log_level = lookup("NR_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let page_url = lookup("NR_PAGE_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let config = Self {
            license_key,
            endpoint,
            harvest_interval,
            timeout,
            https_proxy,
            log_level,
            page_url,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harvest_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "harvest interval must be greater than 0".to_string(),
            ));
        }

        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "NR_HARVEST_ENDPOINT cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a whole number of seconds, got '{value}'")))
}
