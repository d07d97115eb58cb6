//! Desired application configuration

use std::collections::BTreeMap;

use machines_api::{
    MachineCheck, MachineConfig, MachineGuest, MachineMetrics, MachineMount, MachinePort,
    MachineService, METADATA_KEY_PROCESS_GROUP, PROCESS_GROUP_APP, PROCESS_GROUP_RELEASE_COMMAND,
};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Environment variable holding the primary region on every machine
pub const ENV_PRIMARY_REGION: &str = "PRIMARY_REGION";

/// Application configuration read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// App the machines belong to
    pub app_name: String,

    /// Region new machines are created in
    #[serde(default)]
    pub primary_region: String,

    /// Environment shared by every process group
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Process group name to command line
    #[serde(default)]
    pub processes: BTreeMap<String, String>,

    /// Shorthand for a single HTTP service on ports 80 and 443
    #[serde(default)]
    pub http_service: Option<HttpService>,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Machine-level checks, keyed by name
    #[serde(default)]
    pub checks: BTreeMap<String, TopLevelCheck>,

    #[serde(default)]
    pub metrics: Option<MachineMetrics>,

    /// Volume mounted into the app's machines
    #[serde(default)]
    pub mounts: Option<MountConfig>,

    #[serde(default)]
    pub deploy: Option<DeployConfig>,

    /// Dedicated host new and updated machines must run on
    #[serde(default)]
    pub host_dedication_id: String,

    /// Compute size
    #[serde(default)]
    pub guest: Option<MachineGuest>,

    /// Whether the app is a managed Postgres cluster
    #[serde(default)]
    pub managed_postgres: bool,
}

/// Deploy section of the app configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Command run once on a dedicated machine before the rollout
    #[serde(default)]
    pub release_command: Option<String>,

    /// Rollout strategy name
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpService {
    pub internal_port: u16,

    #[serde(default)]
    pub force_https: bool,

    #[serde(default)]
    pub auto_stop_machines: Option<bool>,

    #[serde(default)]
    pub auto_start_machines: Option<bool>,

    #[serde(default)]
    pub min_machines_running: Option<u32>,

    #[serde(default)]
    pub checks: Vec<ServiceCheck>,

    /// Process groups serving it; empty means all
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    pub internal_port: u16,

    #[serde(default)]
    pub ports: Vec<MachinePort>,

    #[serde(default)]
    pub auto_stop_machines: Option<bool>,

    #[serde(default)]
    pub auto_start_machines: Option<bool>,

    #[serde(default)]
    pub min_machines_running: Option<u32>,

    #[serde(default)]
    pub checks: Vec<ServiceCheck>,

    /// Process groups serving it; empty means all
    #[serde(default)]
    pub processes: Vec<String>,
}

/// Check attached to a service, probing the service's internal port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheck {
    #[serde(rename = "type", default = "default_check_type")]
    pub check_type: String,

    #[serde(default)]
    pub interval_secs: Option<u64>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub grace_period_secs: Option<u64>,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLevelCheck {
    #[serde(flatten)]
    pub check: MachineCheck,

    /// Process groups running it; empty means all
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Volume name
    pub source: String,

    /// Path inside the machine
    pub destination: String,

    #[serde(default)]
    pub extend_threshold_percent: u32,

    #[serde(default)]
    pub add_size_gb: u32,

    #[serde(default)]
    pub size_gb_limit: u32,

    /// Process groups mounting it; empty means all
    #[serde(default)]
    pub processes: Vec<String>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_check_type() -> String {
    "http".to_string()
}

fn serves(processes: &[String], group: &str) -> bool {
    processes.is_empty() || processes.iter().any(|p| p == group)
}

impl AppConfig {
    pub fn release_command(&self) -> Option<&str> {
        self.deploy
            .as_ref()
            .and_then(|d| d.release_command.as_deref())
            .filter(|c| !c.trim().is_empty())
    }

    pub fn deploy_strategy(&self) -> Option<&str> {
        self.deploy.as_ref().and_then(|d| d.strategy.as_deref())
    }

    /// Process groups the app defines, `app` when none are listed
    pub fn process_groups(&self) -> Vec<String> {
        if self.processes.is_empty() {
            vec![PROCESS_GROUP_APP.to_string()]
        } else {
            self.processes.keys().cloned().collect()
        }
    }

    /// Apply `KEY=VALUE` env overrides and a primary region override
    pub fn apply_overrides(
        &mut self,
        env_from_flags: &[String],
        primary_region: Option<&str>,
    ) -> Result<(), DeployError> {
        for pair in env_from_flags {
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    self.env.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(DeployError::Precondition(format!(
                        "invalid env override '{}', expected KEY=VALUE",
                        pair
                    )))
                }
            }
        }

        if let Some(region) = primary_region.filter(|r| !r.is_empty()) {
            self.primary_region = region.to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        if self.app_name.trim().is_empty() {
            return Err(DeployError::ConfigError("app_name is required".to_string()));
        }
        if let Some(mount) = &self.mounts {
            if mount.source.is_empty() || mount.destination.is_empty() {
                return Err(DeployError::ConfigError(
                    "mounts need both a source and a destination".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// JSON definition stored on the release record
    pub fn definition(&self) -> Result<serde_json::Value, DeployError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Command for `group`, split on whitespace
    pub fn command_for(&self, group: &str) -> Option<Vec<String>> {
        self.processes
            .get(group)
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
    }

    /// Mount for `group`, with the volume id left for resolution
    pub fn mount_for(&self, group: &str) -> Option<MachineMount> {
        self.mounts
            .as_ref()
            .filter(|m| serves(&m.processes, group))
            .map(|m| MachineMount {
                volume: String::new(),
                path: m.destination.clone(),
                name: m.source.clone(),
                extend_threshold_percent: m.extend_threshold_percent,
                add_size_gb: m.add_size_gb,
                size_gb_limit: m.size_gb_limit,
            })
    }

    pub fn services_for(&self, group: &str) -> Vec<MachineService> {
        let mut services = Vec::new();
        if let Some(http) = self.http_service.as_ref().filter(|s| serves(&s.processes, group)) {
            services.push(MachineService {
                protocol: "tcp".to_string(),
                internal_port: http.internal_port,
                ports: vec![
                    MachinePort {
                        port: Some(80),
                        handlers: vec!["http".to_string()],
                        force_https: http.force_https,
                    },
                    MachinePort {
                        port: Some(443),
                        handlers: vec!["tls".to_string(), "http".to_string()],
                        force_https: false,
                    },
                ],
                autostop: http.auto_stop_machines,
                autostart: http.auto_start_machines,
                min_machines_running: http.min_machines_running,
            });
        }
        services.extend(
            self.services
                .iter()
                .filter(|s| serves(&s.processes, group))
                .map(|s| MachineService {
                    protocol: s.protocol.clone(),
                    internal_port: s.internal_port,
                    ports: s.ports.clone(),
                    autostop: s.auto_stop_machines,
                    autostart: s.auto_start_machines,
                    min_machines_running: s.min_machines_running,
                }),
        );
        services
    }

    /// Machine checks for `group`: top-level checks plus service checks
    pub fn checks_for(&self, group: &str) -> BTreeMap<String, MachineCheck> {
        let mut checks: BTreeMap<String, MachineCheck> = self
            .checks
            .iter()
            .filter(|(_, c)| serves(&c.processes, group))
            .map(|(name, c)| (name.clone(), c.check.clone()))
            .collect();

        let http = self
            .http_service
            .iter()
            .filter(|s| serves(&s.processes, group))
            .map(|s| (s.internal_port, &s.checks));
        let other = self
            .services
            .iter()
            .filter(|s| serves(&s.processes, group))
            .map(|s| (s.internal_port, &s.checks));

        for (index, (port, service_checks)) in http.chain(other).enumerate() {
            for (n, check) in service_checks.iter().enumerate() {
                let name = format!("servicecheck-{:02}-{}-{}", index, n, check.check_type);
                checks.insert(
                    name,
                    MachineCheck {
                        check_type: Some(check.check_type.clone()),
                        port: Some(port),
                        interval_secs: check.interval_secs,
                        timeout_secs: check.timeout_secs,
                        grace_period_secs: check.grace_period_secs,
                        method: check.method.clone(),
                        path: check.path.clone(),
                    },
                );
            }
        }
        checks
    }

    /// Desired machine config for `group`, layered over `orig` when updating.
    /// Mounts carry no volume id; restart policy and standbys come from `orig`.
    pub fn machine_config(
        &self,
        group: &str,
        orig: Option<&MachineConfig>,
        image: &str,
    ) -> Result<MachineConfig, DeployError> {
        if !self.processes.is_empty()
            && group != PROCESS_GROUP_RELEASE_COMMAND
            && !self.processes.contains_key(group)
        {
            return Err(DeployError::ConfigResolution(format!(
                "process group '{}' is not defined in the app configuration",
                group
            )));
        }

        let mut config = orig.cloned().unwrap_or_default();
        config.image = image.to_string();

        let previous_region = config.env.get(ENV_PRIMARY_REGION).cloned();
        config.env = self.env.clone();
        if !self.primary_region.is_empty() {
            config
                .env
                .insert(ENV_PRIMARY_REGION.to_string(), self.primary_region.clone());
        } else if let Some(region) = previous_region {
            config.env.entry(ENV_PRIMARY_REGION.to_string()).or_insert(region);
        }

        if !self.processes.is_empty() {
            config.init.cmd = self.command_for(group);
        }
        config
            .metadata
            .insert(METADATA_KEY_PROCESS_GROUP.to_string(), group.to_string());
        config.services = self.services_for(group);
        config.checks = self.checks_for(group);
        config.metrics = self.metrics.clone();
        config.mounts = self.mount_for(group).into_iter().collect();

        if let Some(guest) = &self.guest {
            let host_dedication_id = config
                .guest
                .as_ref()
                .map(|g| g.host_dedication_id.clone())
                .unwrap_or_default();
            config.guest = Some(MachineGuest {
                host_dedication_id,
                ..guest.clone()
            });
        }

        Ok(config)
    }
}
