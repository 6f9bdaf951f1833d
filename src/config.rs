//! Deployment configuration
//!
//! Settings come from an optional JSON file and are overridden field by field
//! by command-line flags. The merged result is an [`ApplyConfig`], which is
//! what the apply entry point takes as its parameter.

use crate::core::arm::{DEFAULT_API_VERSION, DEFAULT_ENDPOINT};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RULES_FILE: &str = "rules_list.json";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Error type for configuration loading and merging
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting '{0}' (pass --{1} or set it in the config file)")]
    Missing(&'static str, &'static str),

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ConfigError> for crate::core::error::Error {
    fn from(err: ConfigError) -> Self {
        crate::core::error::Error::Config(err.to_string())
    }
}

/// On-disk configuration; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub resource_group: Option<String>,
    pub nsg_name: Option<String>,
    pub location: Option<String>,
    pub subscription_id: Option<String>,
    pub rules_file: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Overlays `other` on top of `self`; set fields in `other` win.
    pub fn merge(self, other: FileConfig) -> FileConfig {
        FileConfig {
            resource_group: other.resource_group.or(self.resource_group),
            nsg_name: other.nsg_name.or(self.nsg_name),
            location: other.location.or(self.location),
            subscription_id: other.subscription_id.or(self.subscription_id),
            rules_file: other.rules_file.or(self.rules_file),
            endpoint: other.endpoint.or(self.endpoint),
            api_version: other.api_version.or(self.api_version),
            poll_interval_secs: other.poll_interval_secs.or(self.poll_interval_secs),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
        }
    }

    /// Resolves defaults and checks required settings.
    pub fn into_apply_config(self) -> Result<ApplyConfig, ConfigError> {
        let required = |value: Option<String>, key: &'static str, flag: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key, flag))
        };

        Ok(ApplyConfig {
            resource_group: required(self.resource_group, "resource_group", "resource-group")?,
            nsg_name: required(self.nsg_name, "nsg_name", "name")?,
            location: required(self.location, "location", "location")?,
            subscription_id: self.subscription_id.filter(|s| !s.is_empty()),
            rules_file: self
                .rules_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_FILE)),
            endpoint: self
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            poll_interval: Duration::from_secs(self.poll_interval_secs.unwrap_or(5)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.unwrap_or(30)),
        })
    }
}

/// Everything one apply run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfig {
    pub resource_group: String,
    pub nsg_name: String,
    pub location: String,
    /// Falls back to `AZURE_SUBSCRIPTION_ID` and then the CLI session
    pub subscription_id: Option<String>,
    pub rules_file: PathBuf,
    pub endpoint: String,
    pub api_version: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

/// Default config file location (`~/.config/nsgpush/config.json` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Loads a config file.
///
/// With an explicit `path` the file must exist. Without one, the default
/// location is tried and a missing file yields an empty config.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(FileConfig::default()),
        },
    };

    let json = match tokio::fs::read_to_string(&path).await {
        Ok(json) => json,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    tracing::debug!("Loaded config from {}", path.display());
    serde_json::from_str(&json).map_err(|source| ConfigError::Invalid { path, source })
}
