//! Application configuration module
//!
//! Provides the tunables for connectivity probing, the sync engine and
//! retry backoff. Values default to the documented constants and can be
//! overridden from a TOML file or through the builder.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the remote document service
    pub remote_url: Option<String>,
    /// Local database file; `None` means the platform data directory
    pub database_path: Option<PathBuf>,
    /// URL hit by the active reachability probe
    pub probe_url: Option<String>,
    /// Upper bound for a single probe
    pub probe_timeout_ms: u64,
    /// Period of background probes
    pub probe_interval_secs: u64,
    /// Round-trip above which the connection counts as slow
    pub slow_threshold_ms: u64,
    /// Period of the automatic drain cycle
    pub sync_interval_secs: u64,
    /// Attempts before a pending operation is abandoned
    pub max_retries: u32,
    /// First backoff step
    pub base_delay_ms: u64,
    /// Backoff ceiling (before jitter)
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of the uniform jitter added to each delay
    pub max_jitter_ms: u64,
    /// Also queue writes that succeeded remotely
    pub audit_successful_writes: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            database_path: None,
            probe_url: None,
            probe_timeout_ms: 5_000,
            probe_interval_secs: 30,
            slow_threshold_ms: 1_500,
            sync_interval_secs: 30,
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            audit_successful_writes: true,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("sync_interval_secs must be > 0"));
        }
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("probe_interval_secs must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue("max_retries must be > 0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue("base_delay_ms must not exceed max_delay_ms"));
        }
        for url in [&self.remote_url, &self.probe_url].into_iter().flatten() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        Ok(())
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the remote service URL
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_url = Some(url.into());
        self
    }

    /// Set the local database file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Set the reachability probe URL
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.config.probe_url = Some(url.into());
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn slow_threshold_ms(mut self, ms: u64) -> Self {
        self.config.slow_threshold_ms = ms;
        self
    }

    pub fn audit_successful_writes(mut self, enabled: bool) -> Self {
        self.config.audit_successful_writes = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
