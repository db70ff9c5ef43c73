//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "rentwise.toml",
    "config.toml",
    "./config/rentwise.toml",
    "/etc/rentwise/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, then validate the result
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup)? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Result<Option<PathBuf>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // An explicitly requested file has to exist
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        if let Some(path) = lookup("RENTWISE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(?path, "RENTWISE_CONFIG points to a missing file, searching defaults");
        }

        Ok(CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // API
    if let Some(val) = lookup("RENTWISE_API_BASE_URL") {
        config.api.base_url = val;
    }
    if let Some(val) = lookup("RENTWISE_API_REFRESH_PATH") {
        config.api.refresh_path = val;
    }
    if let Some(val) = lookup("RENTWISE_API_TIMEOUT_MS") {
        if let Ok(timeout) = val.parse() {
            config.api.timeout_ms = timeout;
        }
    }
    if let Some(val) = lookup("RENTWISE_API_CONNECT_TIMEOUT_MS") {
        if let Ok(timeout) = val.parse() {
            config.api.connect_timeout_ms = timeout;
        }
    }

    // Credentials
    if let Some(val) = lookup("RENTWISE_CREDENTIALS_STORE") {
        config.credentials.store = val.to_lowercase();
    }
    if let Some(val) = lookup("RENTWISE_CREDENTIALS_DIR") {
        config.credentials.dir = val;
    }
    if let Some(val) = lookup("RENTWISE_CREDENTIALS_SLOT") {
        config.credentials.slot = val;
    }

    // Dispatch
    if let Some(val) = lookup("RENTWISE_REFRESH_POLICY") {
        config.dispatch.refresh_policy = val.to_lowercase();
    }
    if let Some(val) = lookup("RENTWISE_EXPIRY_LEEWAY_SECS") {
        if let Ok(leeway) = val.parse() {
            config.dispatch.expiry_leeway_secs = leeway;
        }
    }

    // Session
    if let Some(val) = lookup("RENTWISE_LOGIN_URL") {
        config.session.login_url = val;
    }
}
