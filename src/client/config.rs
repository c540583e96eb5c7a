use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default remote service URL
const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:8080";

/// Environment variable pointing at an optional TOML configuration file
pub const CONFIG_FILE_ENV: &str = "FIELDSYNC_CONFIG";

/// Runtime configuration wrapper.
///
/// Layers, lowest precedence first: defaults, TOML file named by
/// `FIELDSYNC_CONFIG`, then individual `FIELDSYNC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builder(builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        Ok(Self { app: builder.build()? })
    }

    /// Load configuration from the optional file and the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut app = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::read_file(Path::new(&path))?,
            Err(_) => AppConfig::default(),
        };
        Self::apply_env(&mut app, |key| std::env::var(key).ok())?;
        app.validate()?;
        Ok(Self { app })
    }

    fn read_file(path: &Path) -> Result<AppConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        AppConfig::from_toml_str(&contents)
    }

    fn apply_env(
        app: &mut AppConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("FIELDSYNC_REMOTE_URL") {
            app.remote_url = Some(url);
        }
        if let Some(path) = lookup("FIELDSYNC_DB_PATH") {
            app.database_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("FIELDSYNC_PROBE_URL") {
            app.probe_url = Some(url);
        }
        if let Some(secs) = lookup("FIELDSYNC_SYNC_INTERVAL_SECS") {
            app.sync_interval_secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FIELDSYNC_SYNC_INTERVAL_SECS must be an integer"))?;
        }
        if let Some(retries) = lookup("FIELDSYNC_MAX_RETRIES") {
            app.max_retries = retries
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FIELDSYNC_MAX_RETRIES must be an integer"))?;
        }
        Ok(())
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn remote_url(&self) -> &str {
        self.app.remote_url.as_deref().unwrap_or(DEFAULT_REMOTE_URL)
    }

    /// Probe URL, falling back to the remote service itself
    pub fn probe_url(&self) -> &str {
        self.app.probe_url.as_deref().unwrap_or_else(|| self.remote_url())
    }

    /// Get the full URL for a remote endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.remote_url().trim_end_matches('/'), path)
    }

    /// Local database file path.
    ///
    /// Uses the system's data directory when no path is configured.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.app.database_path {
            return path.clone();
        }
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("fieldsync");
        path.push("local.db");
        path
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.app.probe_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.app.probe_interval_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.app.slow_threshold_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.app.sync_interval_secs)
    }

    pub fn max_retries(&self) -> u32 {
        self.app.max_retries
    }

    pub fn audit_successful_writes(&self) -> bool {
        self.app.audit_successful_writes
    }
}
