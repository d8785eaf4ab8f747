//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default backend URL (can be overridden at compile time via GUELP_API_BASE_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("GUELP_API_BASE_URL") {
    Some(url) => url,
    None => "https://zwftj3xpti.us-east-1.awsapprunner.com",
};

/// Default request timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 15_000;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How role and permission strings are compared when picking a destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleMatchMode {
    /// Only whole-value matches count.
    Exact,
    /// Exact matches first, then substring matches (e.g. `"school_admin"` contains `"admin"`).
    #[default]
    SubstringCompatible,
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend base URL, without trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,
    /// Whether a 401 should try the refresh endpoint before signing out.
    #[serde(default = "default_refresh_enabled")]
    pub refresh_enabled: bool,
    #[serde(default)]
    pub role_match_mode: RoleMatchMode,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_api_timeout_ms() -> u64 {
    DEFAULT_API_TIMEOUT_MS
}

fn default_refresh_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            api_timeout_ms: DEFAULT_API_TIMEOUT_MS,
            refresh_enabled: true,
            role_match_mode: RoleMatchMode::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config.normalize();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.normalize();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(level) = non_empty_env("GUELP_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = non_empty_env("GUELP_API_BASE_URL") {
            self.api_base_url = url;
        }
    }

    fn normalize(&mut self) {
        let trimmed = self.api_base_url.trim().trim_end_matches('/');
        self.api_base_url = if trimmed.is_empty() {
            default_api_base_url()
        } else {
            trimmed.to_string()
        };
    }

    /// Get the backend base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.api_base_url)?;
        if url.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "API base URL cannot be used as a base: {}",
                self.api_base_url
            )));
        }
        Ok(url)
    }

    /// Request timeout as a `Duration`.
    pub fn api_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.api_timeout_ms)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
