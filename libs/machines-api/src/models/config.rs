use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{METADATA_KEY_PROCESS_GROUP, PROCESS_GROUP_APP};

/// Desired configuration of a single machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Image reference
    #[serde(default)]
    pub image: String,

    /// Environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Init process overrides
    #[serde(default)]
    pub init: MachineInit,

    /// Free-form metadata, partly owned by the platform
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    /// Exposed services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<MachineService>,

    /// Health checks keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, MachineCheck>,

    /// Volume mounts. At most one is supported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MachineMount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<MachineRestart>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<MachineGuest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MachineMetrics>,

    /// Machines this one stands by for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub standbys: Vec<String>,
}

impl MachineConfig {
    /// Process group recorded in the metadata, `app` when unset or empty
    pub fn process_group(&self) -> &str {
        match self.metadata.get(METADATA_KEY_PROCESS_GROUP) {
            Some(group) if !group.is_empty() => group,
            _ => PROCESS_GROUP_APP,
        }
    }

    /// Host dedication id of the guest, empty when unset
    pub fn host_dedication_id(&self) -> &str {
        self.guest
            .as_ref()
            .map(|g| g.host_dedication_id.as_str())
            .unwrap_or("")
    }

    /// Shortest interval among the configured checks
    pub fn shortest_check_interval(&self) -> Option<Duration> {
        self.checks
            .values()
            .filter_map(MachineCheck::interval)
            .filter(|interval| !interval.is_zero())
            .min()
    }
}

/// Init process overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<Vec<String>>,
}

/// A service exposed by the machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineService {
    pub protocol: String,

    pub internal_port: u16,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<MachinePort>,

    /// Stop the machine when idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostop: Option<bool>,

    /// Start the machine on incoming traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_machines_running: Option<u32>,
}

impl MachineService {
    /// Whether the service scales the machine up or down on its own
    pub fn autoscales(&self) -> bool {
        self.autostop.unwrap_or(false) || self.autostart.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachinePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<String>,

    #[serde(default)]
    pub force_https: bool,
}

/// A health check run by the control plane against the machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineCheck {
    /// `http` or `tcp`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MachineCheck {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

/// Volume mount
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineMount {
    /// Volume id
    #[serde(default)]
    pub volume: String,

    /// Destination path inside the machine
    pub path: String,

    /// Volume name, may be empty on old machines
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub extend_threshold_percent: u32,

    #[serde(default)]
    pub add_size_gb: u32,

    #[serde(default)]
    pub size_gb_limit: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    #[default]
    Always,
    OnFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineRestart {
    pub policy: RestartPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Guest sizing and placement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineGuest {
    #[serde(default)]
    pub cpu_kind: String,

    #[serde(default)]
    pub cpus: u32,

    #[serde(default)]
    pub memory_mb: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_dedication_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineMetrics {
    pub port: u16,
    pub path: String,
}

/// Input for creating or updating a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchMachineInput {
    /// Existing machine id, absent on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub region: String,

    pub config: MachineConfig,

    /// Apply the config without starting the machine
    #[serde(default)]
    pub skip_launch: bool,

    /// The machine must be destroyed and launched again rather than updated in place
    #[serde(skip)]
    pub requires_replacement: bool,
}
