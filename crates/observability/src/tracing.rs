//! Tracing/logging initialization.
//!
//! `RUST_LOG` always wins over the configured default directive.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "SHOPFRONT_LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservabilityConfigError {
    #[error("invalid log format {0:?} (expected json or pretty)")]
    InvalidLogFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = ObservabilityConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(ObservabilityConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

fn default_directive() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_directive")]
    pub default_directive: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_directive: default_directive(),
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self, ObservabilityConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObservabilityConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_LOG_FORMAT).filter(|v| !v.trim().is_empty()) {
            config.format = raw.parse()?;
        }
        Ok(config)
    }
}

/// Initialize tracing from the environment, falling back to JSON logs when
/// `SHOPFRONT_LOG_FORMAT` is unusable.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_default();
    init_with(&config);
}

/// Initialize tracing/logging for the process.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .is_ok();

    if installed {
        ::tracing::debug!(format = ?config.format, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn lookup_overrides_format() {
        let config = ObservabilityConfig::from_lookup(|key| {
            (key == ENV_LOG_FORMAT).then(|| "pretty".to_string())
        })
        .unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.default_directive, "info");
    }

    #[test]
    fn second_init_is_a_noop() {
        init();
        assert!(!init_with(&ObservabilityConfig::default()));
    }
}
