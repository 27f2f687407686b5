//! Configuration management for assist-rs
//!
//! Implements a hierarchical configuration system:
//! 1. Global config (`<config_dir>/assist/config.json`)
//! 2. Project config (`./.assist.json`)
//! 3. Environment variables (`ASSIST_BASE_URL`, `ASSIST_TIMEOUT_MS`, `ASSIST_PROXY`)
//! 4. CLI parameters (highest priority)

pub mod settings;

use std::{path::PathBuf, str::FromStr, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use self::settings::Settings;
use crate::error::{AssistError, Result};

/// Default request timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for service calls
pub const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 60_000;

/// Effective configuration after all layers are applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub settings: Settings,
}

impl Config {
    /// Load configuration from files and environment
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or parsed, or
    /// an environment override is malformed
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&[Self::global_config_path(), Self::project_config_path()])?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load and merge config files in order; later files win
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut settings = Settings::default();
        for path in paths {
            debug!(path = %path.display(), "loading config layer");
            settings.merge(Settings::load_from_path(path)?);
        }
        Ok(Self { settings })
    }

    /// Apply `ASSIST_*` overrides from `lookup`
    ///
    /// # Errors
    ///
    /// Returns an error if `ASSIST_TIMEOUT_MS` is not a number
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("ASSIST_BASE_URL") {
            self.settings.base_url = Some(base_url);
        }
        if let Some(timeout) = lookup("ASSIST_TIMEOUT_MS") {
            let timeout = u64::from_str(timeout.trim()).map_err(|e| {
                AssistError::ConfigValidation(format!("ASSIST_TIMEOUT_MS: {e}"))
            })?;
            self.settings.timeout_ms = Some(timeout);
        }
        if let Some(proxy) = lookup("ASSIST_PROXY") {
            self.settings.proxy = Some(proxy);
        }
        Ok(())
    }

    /// Get the configuration directory path
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("assist")
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the project config file path in the current directory
    #[must_use]
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".assist.json")
    }

    /// Check URLs and headers before a client is built
    ///
    /// # Errors
    ///
    /// Returns [`AssistError::ConfigValidation`] naming the first bad setting
    pub fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.settings.base_url {
            url::Url::parse(base_url).map_err(|e| {
                AssistError::ConfigValidation(format!("base_url {base_url:?}: {e}"))
            })?;
        }
        if let Some(proxy) = &self.settings.proxy {
            url::Url::parse(proxy)
                .map_err(|e| AssistError::ConfigValidation(format!("proxy {proxy:?}: {e}")))?;
        }
        self.header_map().map(drop)
    }

    /// Default headers as a [`HeaderMap`]
    ///
    /// # Errors
    ///
    /// Returns an error if a name or value is not a valid HTTP header
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.settings.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                AssistError::ConfigValidation(format!("header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AssistError::ConfigValidation(format!("header value for {name}: {e}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Timeout applied when a request does not set one
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Timeout applied to service calls
    #[must_use]
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(
            self.settings
                .service_timeout_ms
                .unwrap_or(DEFAULT_SERVICE_TIMEOUT_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_config_paths() {
        let global_path = Config::global_config_path();
        assert!(global_path.ends_with("assist/config.json"));

        let project_path = Config::project_config_path();
        assert_eq!(project_path, PathBuf::from(".assist.json"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.service_timeout(), Duration::from_secs(60));
        assert!(config.header_map().unwrap().is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_timeout_means_indefinite() {
        let mut config = Config::default();
        config.settings.timeout_ms = Some(0);
        assert_eq!(config.request_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_project_layer_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("config.json");
        let project = temp_dir.path().join(".assist.json");
        fs::write(&global, r#"{"base_url": "http://global", "timeout_ms": 1000}"#).unwrap();
        fs::write(&project, r#"{"base_url": "http://project"}"#).unwrap();

        let config = Config::load_from(&[global, project]).unwrap();
        assert_eq!(config.settings.base_url.as_deref(), Some("http://project"));
        assert_eq!(config.request_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "ASSIST_BASE_URL" => Some("http://env".to_string()),
                "ASSIST_TIMEOUT_MS" => Some("2500".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.settings.base_url.as_deref(), Some("http://env"));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.settings.proxy, None);
    }

    #[test]
    fn test_env_bad_timeout() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "ASSIST_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, AssistError::ConfigValidation(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.settings.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .settings
            .default_headers
            .insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            config.validate().unwrap_err(),
            AssistError::ConfigValidation(_)
        ));

        let mut config = Config::default();
        config
            .settings
            .default_headers
            .insert("X-Trace".to_string(), "line\nbreak".to_string());
        assert!(config.header_map().is_err());
    }

    #[test]
    fn test_header_map() {
        let mut config = Config::default();
        config
            .settings
            .default_headers
            .insert("Authorization".to_string(), "Bearer abc".to_string());

        let headers = config.header_map().unwrap();
        assert_eq!(headers["authorization"], "Bearer abc");
    }
}
