//! Runtime configuration for the directory services.
//!
//! Values come from defaults, optionally overridden by `SHOPFRONT_*`
//! environment variables.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use shopfront_directory::DEFAULT_FRESHNESS_WINDOW_HOURS;

use crate::retry::RetryPolicy;

pub const ENV_FRESHNESS_WINDOW_SECS: &str = "SHOPFRONT_FRESHNESS_WINDOW_SECS";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "SHOPFRONT_REFRESH_INTERVAL_SECS";
pub const ENV_PROVIDER_URL: &str = "SHOPFRONT_PROVIDER_URL";
pub const ENV_PROVIDER_TOKEN: &str = "SHOPFRONT_PROVIDER_TOKEN";
pub const ENV_PROVIDER_TIMEOUT_SECS: &str = "SHOPFRONT_PROVIDER_TIMEOUT_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SHOPFRONT_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "SHOPFRONT_RETRY_BASE_DELAY_MS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be set when {required_by} is set")]
    Missing {
        key: &'static str,
        required_by: &'static str,
    },
}

fn default_freshness_window_secs() -> u64 {
    (DEFAULT_FRESHNESS_WINDOW_HOURS as u64) * 3600
}

fn default_refresh_interval_secs() -> u64 {
    15 * 60
}

fn default_provider_timeout_secs() -> u64 {
    10
}

/// Directory materialization settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryConfig {
    /// A listing synced longer ago than this is left out of the directory.
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    /// How often the directory snapshot is rebuilt.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn freshness_window(&self) -> Result<chrono::Duration, ConfigError> {
        positive_seconds(ENV_FRESHNESS_WINDOW_SECS, self.freshness_window_secs)
    }

    pub fn refresh_interval(&self) -> Result<chrono::Duration, ConfigError> {
        positive_seconds(ENV_REFRESH_INTERVAL_SECS, self.refresh_interval_secs)
    }
}

/// Converts a configured second count, rejecting zero and anything chrono
/// cannot represent.
fn positive_seconds(key: &'static str, secs: u64) -> Result<chrono::Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(key, "0", "must be positive"));
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| invalid(key, &secs.to_string(), "out of range"))
}

/// Connection settings for the external category provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout_secs: default_provider_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ShopfrontConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ShopfrontConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_FRESHNESS_WINDOW_SECS)? {
            config.directory.freshness_window_secs = secs;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_REFRESH_INTERVAL_SECS)? {
            config.directory.refresh_interval_secs = secs;
        }

        let token = non_empty(&lookup, ENV_PROVIDER_TOKEN);
        let timeout = parse_var::<u64>(&lookup, ENV_PROVIDER_TIMEOUT_SECS)?;
        match non_empty(&lookup, ENV_PROVIDER_URL) {
            Some(url) => {
                let mut provider = ProviderConfig::new(url);
                provider.api_token = token;
                if let Some(secs) = timeout {
                    provider.timeout_secs = secs;
                }
                config.provider = Some(provider);
            }
            None if token.is_some() => {
                return Err(ConfigError::Missing {
                    key: ENV_PROVIDER_URL,
                    required_by: ENV_PROVIDER_TOKEN,
                });
            }
            None => {}
        }

        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_RETRY_MAX_ATTEMPTS)? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS)? {
            config.retry.base_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.directory.freshness_window()?;
        self.directory.refresh_interval()?;
        if self.retry.max_attempts == 0 {
            return Err(invalid(ENV_RETRY_MAX_ATTEMPTS, "0", "at least one attempt is required"));
        }
        if let Some(provider) = &self.provider {
            if !(provider.base_url.starts_with("http://") || provider.base_url.starts_with("https://")) {
                return Err(invalid(ENV_PROVIDER_URL, &provider.base_url, "expected an http(s) URL"));
            }
            if provider.timeout_secs == 0 {
                return Err(invalid(ENV_PROVIDER_TIMEOUT_SECS, "0", "must be positive"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}
