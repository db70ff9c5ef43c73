//! Rentwise Configuration System
//!
//! TOML-based configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
}

/// Backend API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL that relative request paths are joined onto
    pub base_url: String,
    /// Path of the token refresh endpoint
    pub refresh_path: String,
    /// Whole-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            user_agent: format!("rentwise/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Where the bearer token is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// "file" or "memory"
    pub store: String,
    /// Directory holding the file-backed slot
    pub dir: String,
    /// Name of the slot (file name for the file store)
    pub slot: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            store: "file".to_string(),
            dir: "./data/credentials".to_string(),
            slot: "token".to_string(),
        }
    }
}

/// Dispatcher behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// "single_flight" or "independent"
    pub refresh_policy: String,
    /// Treat tokens expiring within this many seconds as already expired
    pub expiry_leeway_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            refresh_policy: "single_flight".to_string(),
            expiry_leeway_secs: 0,
        }
    }
}

/// Login surface the user is sent back to once the session is gone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub login_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_url: "/login".to_string(),
        }
    }
}

const STORE_KINDS: &[&str] = &["file", "memory"];
const REFRESH_POLICIES: &[&str] = &["single_flight", "independent"];

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject values the client cannot be built from
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if !STORE_KINDS.contains(&self.credentials.store.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "credentials.store must be one of {:?}, got '{}'",
                STORE_KINDS, self.credentials.store
            )));
        }
        if self.credentials.slot.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "credentials.slot must not be empty".to_string(),
            ));
        }
        if !REFRESH_POLICIES.contains(&self.dispatch.refresh_policy.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.refresh_policy must be one of {:?}, got '{}'",
                REFRESH_POLICIES, self.dispatch.refresh_policy
            )));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Rentwise Configuration
# Environment variables (RENTWISE_*) override these settings

[api]
base_url = "http://localhost:3000"
refresh_path = "/api/auth/refresh"
timeout_ms = 30000
connect_timeout_ms = 10000

[credentials]
store = "file"  # file or memory
dir = "./data/credentials"
slot = "token"

[dispatch]
refresh_policy = "single_flight"  # single_flight or independent
expiry_leeway_secs = 0

[session]
login_url = "/login"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.refresh_path, "/api/auth/refresh");
        assert_eq!(config.dispatch.expiry_leeway_secs, 0);
    }

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.credentials.slot, "token");
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"https://rent.example.com\"\n\n[session]\nlogin_url = \"https://rent.example.com/login\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api.base_url, "https://rent.example.com");
        assert_eq!(config.api.timeout_ms, 30_000);
        assert_eq!(config.session.login_url, "https://rent.example.com/login");
        assert_eq!(config.credentials.store, "file");
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nbase_url = ").unwrap();

        let result = AppConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_values() {
        let mut config = AppConfig::default();
        config.credentials.store = "cookie".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AppConfig::default();
        config.dispatch.refresh_policy = "eager".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AppConfig::default();
        config.api.base_url = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }
}
