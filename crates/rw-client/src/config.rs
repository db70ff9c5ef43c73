//! Client configuration

use std::str::FromStr;
use std::time::Duration;

/// How concurrent callers holding the same expired token refresh it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// One refresh at a time; callers that waited for it reuse its outcome
    #[default]
    SingleFlight,
    /// Every caller refreshes on its own and the last store write wins
    Independent,
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_flight" => Ok(RefreshPolicy::SingleFlight),
            "independent" => Ok(RefreshPolicy::Independent),
            other => Err(format!("unknown refresh policy '{}'", other)),
        }
    }
}

/// Configuration for [`ApiClient`](crate::ApiClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL relative request paths are joined onto
    pub base_url: String,

    /// Refresh endpoint path (defaults to /api/auth/refresh)
    pub refresh_path: String,

    /// Where the user is sent once the session is gone
    pub login_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Connect timeout
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    pub refresh_policy: RefreshPolicy,

    /// Tokens expiring within this window are refreshed before use
    pub expiry_leeway: Duration,
}

impl ClientConfig {
    /// Create a configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: "/api/auth/refresh".to_string(),
            login_url: "/login".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("rentwise/{}", env!("CARGO_PKG_VERSION")),
            refresh_policy: RefreshPolicy::default(),
            expiry_leeway: Duration::ZERO,
        }
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self
    }

    /// Set request and connect timeouts
    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Absolute URLs pass through; paths are joined onto the base URL
    pub fn resolve_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return path_or_url.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path_or_url.is_empty() {
            base.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{}", base, path_or_url)
        } else {
            format!("{}/{}", base, path_or_url)
        }
    }

    /// Full URL of the refresh endpoint
    pub fn refresh_url(&self) -> String {
        self.resolve_url(&self.refresh_path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
