//! Persisted client settings

use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AssistError, Result};

/// Settings read from a JSON config file.
///
/// Every field is optional so that a project file can override only what it
/// names; see [`Settings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Prefix for relative request URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Headers sent with every request
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub default_headers: IndexMap<String, String>,

    /// Default request timeout in milliseconds; `0` waits indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Timeout for service calls in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_timeout_ms: Option<u64>,

    /// HTTP proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Settings {
    /// Load settings from a specific path
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| AssistError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| AssistError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Save settings to a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay `other` on top of `self`.
    ///
    /// Fields set in `other` win; headers are merged by name.
    pub fn merge(&mut self, other: Self) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        if other.service_timeout_ms.is_some() {
            self.service_timeout_ms = other.service_timeout_ms;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        self.default_headers.extend(other.default_headers);
    }
}
