//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::File;
use crate::logs::LogLevel;

/// Environment variable overriding the access token
pub const ENV_ACCESS_TOKEN: &str = "MACHDEPLOY_ACCESS_TOKEN";

/// Environment variable overriding the control plane URL
pub const ENV_API_BASE_URL: &str = "MACHDEPLOY_API_BASE_URL";

/// Environment variable overriding the release service URL
pub const ENV_RELEASES_BASE_URL: &str = "MACHDEPLOY_RELEASES_BASE_URL";

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily log files, no file logging when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Machines control plane
    #[serde(default)]
    pub control_plane: BackendSettings,

    /// Release service
    #[serde(default)]
    pub release_backend: BackendSettings,

    /// Access token for both services, redacted from `Debug`
    #[serde(default, skip_serializing)]
    access_token: Option<SecretString>,

    /// Bound for each wait on a machine, in seconds
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Lease duration, in seconds
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,
}

fn default_wait_timeout() -> u64 {
    120
}

fn default_lease_timeout() -> u64 {
    1800
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            control_plane: BackendSettings::default(),
            release_backend: BackendSettings::default(),
            access_token: None,
            wait_timeout_secs: default_wait_timeout(),
            lease_timeout_secs: default_lease_timeout(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is missing,
    /// then apply environment overrides
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        let mut settings = if file.exists().await {
            file.read_json::<Settings>().await?
        } else {
            debug!("No settings file at {}, using defaults", file.path().display());
            Settings::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply overrides looked up through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|t| !t.is_empty()) {
            self.access_token = Some(SecretString::from(token));
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|u| !u.is_empty()) {
            self.control_plane.base_url = url;
        }
        if let Some(url) = lookup(ENV_RELEASES_BASE_URL).filter(|u| !u.is_empty()) {
            self.release_backend.base_url = url;
        }
    }

    pub fn access_token(&self) -> Result<SecretString, DeployError> {
        self.access_token
            .clone()
            .filter(|t| !t.expose_secret().is_empty())
            .ok_or_else(|| {
                DeployError::ConfigError(format!(
                    "no access token, set {} or access_token in the settings file",
                    ENV_ACCESS_TOKEN
                ))
            })
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }
}

/// Remote service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the service
    #[serde(default = "default_backend_url")]
    pub base_url: String,
}

fn default_backend_url() -> String {
    "http://localhost:4280/v1".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
        }
    }
}
