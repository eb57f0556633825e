//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend API base URL (overridable at compile time via PLANNER_API_URL).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("PLANNER_API_URL") {
    Some(url) => url,
    None => "http://localhost:5000",
};

/// Where the identity provider sends the browser after Google sign-in.
pub const DEFAULT_OAUTH_REDIRECT_URL: &str = match option_env!("PLANNER_OAUTH_REDIRECT_URL") {
    Some(url) => url,
    None => "http://localhost:5000/auth/callback",
};

/// Compile-time provider URL. When absent the provider configuration is
/// fetched from the backend at first use.
const COMPILED_SUPABASE_URL: Option<&str> = option_env!("SUPABASE_URL");

/// Compile-time provider public key, paired with `COMPILED_SUPABASE_URL`.
const COMPILED_SUPABASE_ANON_KEY: Option<&str> = option_env!("SUPABASE_ANON_KEY");

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default freshness window for cached query results.
pub const DEFAULT_QUERY_STALE_TIME_SECS: u64 = 60;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend API base URL (serves `/api/auth/user` and the provider config).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Identity provider URL. `None` means "ask the backend".
    #[serde(default = "default_supabase_url")]
    pub supabase_url: Option<String>,
    /// Identity provider public key. `None` means "ask the backend".
    #[serde(default = "default_supabase_anon_key")]
    pub supabase_anon_key: Option<String>,
    /// Redirect target handed to the provider for OAuth sign-in.
    #[serde(default = "default_oauth_redirect_url")]
    pub oauth_redirect_url: String,
    /// Seconds a cached query result stays fresh.
    #[serde(default = "default_query_stale_time_secs")]
    pub query_stale_time_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_supabase_url() -> Option<String> {
    COMPILED_SUPABASE_URL.map(str::to_string)
}

fn default_supabase_anon_key() -> Option<String> {
    COMPILED_SUPABASE_ANON_KEY.map(str::to_string)
}

fn default_oauth_redirect_url() -> String {
    DEFAULT_OAUTH_REDIRECT_URL.to_string()
}

fn default_query_stale_time_secs() -> u64 {
    DEFAULT_QUERY_STALE_TIME_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            supabase_url: default_supabase_url(),
            supabase_anon_key: default_supabase_anon_key(),
            oauth_redirect_url: default_oauth_redirect_url(),
            query_stale_time_secs: default_query_stale_time_secs(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(level) = non_empty_env("PLANNER_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = non_empty_env("PLANNER_API_URL") {
            self.api_base_url = url;
        }
    }

    /// The backend base URL, parsed and without a trailing slash.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let trimmed = self.api_base_url.trim_end_matches('/');
        Url::parse(trimmed).map_err(CoreError::from)
    }

    /// Provider URL and key when both are pinned locally.
    pub fn pinned_provider(&self) -> Option<(String, String)> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Some((url.trim_end_matches('/').to_string(), key.clone()))
            }
            _ => None,
        }
    }

    /// Freshness window for the query cache.
    pub fn query_stale_time(&self) -> Duration {
        Duration::from_secs(self.query_stale_time_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.query_stale_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.oauth_redirect_url, DEFAULT_OAUTH_REDIRECT_URL);
        assert_eq!(config.query_stale_time_secs, DEFAULT_QUERY_STALE_TIME_SECS);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.api_base_url = "https://planner.example.com".to_string();
        config.supabase_url = Some("https://abc.supabase.co".to_string());
        config.supabase_anon_key = Some("anon".to_string());
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(
            loaded.pinned_provider(),
            Some(("https://abc.supabase.co".to_string(), "anon".to_string()))
        );
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.oauth_redirect_url, DEFAULT_OAUTH_REDIRECT_URL);
    }

    #[test]
    fn test_api_base_url_strips_trailing_slash() {
        let mut config = Config::default();
        config.api_base_url = "https://planner.example.com/".to_string();
        let url = config.api_base_url().unwrap();
        assert_eq!(url.host_str(), Some("planner.example.com"));
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_base_url = "not a valid url".to_string();
        assert!(config.api_base_url().is_err());
    }

    #[test]
    fn test_pinned_provider_requires_both_values() {
        let mut config = Config::default();
        config.supabase_url = Some("https://abc.supabase.co/".to_string());
        config.supabase_anon_key = None;
        assert!(config.pinned_provider().is_none());

        config.supabase_anon_key = Some("  ".to_string());
        assert!(config.pinned_provider().is_none());

        config.supabase_anon_key = Some("anon".to_string());
        assert_eq!(
            config.pinned_provider().map(|(url, _)| url),
            Some("https://abc.supabase.co".to_string())
        );
    }
}
