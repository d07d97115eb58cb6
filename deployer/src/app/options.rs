//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

/// Default bound for each wait on a machine
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default lease duration taken on every machine for the rollout
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Settings file
    pub settings_path: PathBuf,

    /// App configuration file
    pub config_path: PathBuf,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("machdeploy.json"),
            config_path: PathBuf::from("app.json"),
        }
    }
}

/// Options of a single deployment
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOptions {
    /// Image to deploy; required unless restarting
    pub image: Option<String>,

    /// Strategy override
    pub strategy: Option<String>,

    /// `KEY=VALUE` environment overrides
    pub env_from_flags: Vec<String>,

    /// Primary region override
    pub primary_region: Option<String>,

    /// Don't wait for health checks
    pub skip_health_checks: bool,

    /// Refresh release metadata only, keeping each machine's config
    pub restart_only: bool,

    /// Bound for each wait, zero means the default
    pub wait_timeout: Duration,

    /// Lease duration, zero means the default
    pub lease_timeout: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            image: None,
            strategy: None,
            env_from_flags: Vec::new(),
            primary_region: None,
            skip_health_checks: false,
            restart_only: false,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }
}

impl DeployOptions {
    pub fn effective_wait_timeout(&self) -> Duration {
        if self.wait_timeout.is_zero() {
            DEFAULT_WAIT_TIMEOUT
        } else {
            self.wait_timeout
        }
    }

    pub fn effective_lease_timeout(&self) -> Duration {
        if self.lease_timeout.is_zero() {
            DEFAULT_LEASE_TIMEOUT
        } else {
            self.lease_timeout
        }
    }
}
