use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MachineConfig;

/// Lifecycle state of a machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    #[default]
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Replacing,
    Destroying,
    Destroyed,
    #[serde(other)]
    Unknown,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Created => "created",
            MachineState::Starting => "starting",
            MachineState::Started => "started",
            MachineState::Stopping => "stopping",
            MachineState::Stopped => "stopped",
            MachineState::Replacing => "replacing",
            MachineState::Destroying => "destroying",
            MachineState::Destroyed => "destroyed",
            MachineState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine as reported by the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub state: MachineState,

    pub region: String,

    /// Current instance, changes on every update
    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub private_ip: String,

    #[serde(default)]
    pub config: MachineConfig,

    /// Event history
    #[serde(default)]
    pub events: Vec<MachineEvent>,

    /// Health check results
    #[serde(default)]
    pub checks: Vec<CheckStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Machine {
    pub fn process_group(&self) -> &str {
        self.config.process_group()
    }

    /// Aggregated status of the machine's health checks
    pub fn health_check_status(&self) -> HealthCheckStatus {
        HealthCheckStatus::from_checks(&self.checks, self.config.checks.len())
    }

    /// Latest event of `event_type` that happened after the latest event of `after_type`
    pub fn latest_event_of_type_after_type(
        &self,
        event_type: &str,
        after_type: &str,
    ) -> Option<&MachineEvent> {
        let after = self
            .events
            .iter()
            .filter(|e| e.event_type == after_type)
            .map(|e| e.timestamp)
            .max()?;

        self.events
            .iter()
            .filter(|e| e.event_type == event_type && e.timestamp > after)
            .max_by_key(|e| e.timestamp)
    }
}

/// An entry of the machine event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineEvent {
    /// `launch`, `start`, `exit`, `update`, ...
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub source: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<MachineEventRequest>,
}

/// Payload attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineEventRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_event: Option<ExitEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_event: Option<MonitorEvent>,
}

impl MachineEventRequest {
    /// Exit code of the process, from either the exit or the monitor payload
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_event
            .as_ref()
            .or_else(|| {
                self.monitor_event
                    .as_ref()
                    .and_then(|m| m.exit_event.as_ref())
            })
            .map(|e| e.exit_code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub exit_code: i32,

    #[serde(default)]
    pub oom_killed: bool,

    #[serde(default)]
    pub requested_stop: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_event: Option<ExitEvent>,
}

/// Result of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Passing,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatus {
    pub name: String,

    pub status: CheckState,

    #[serde(default)]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Counts of health check results for one or more machines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckStatus {
    pub total: usize,
    pub passing: usize,
    pub warning: usize,
    pub critical: usize,
}

impl HealthCheckStatus {
    /// Count results. `expected` is the number of configured checks; checks that
    /// have not reported yet count towards the total but not as passing.
    pub fn from_checks(checks: &[CheckStatus], expected: usize) -> Self {
        let mut status = HealthCheckStatus {
            total: checks.len().max(expected),
            ..Default::default()
        };
        for check in checks {
            match check.status {
                CheckState::Passing => status.passing += 1,
                CheckState::Warning => status.warning += 1,
                CheckState::Critical => status.critical += 1,
            }
        }
        status
    }

    pub fn all_passing(&self) -> bool {
        self.passing == self.total
    }

    /// Short human summary, empty when there are no checks
    pub fn summary(&self) -> String {
        if self.total == 0 {
            return String::new();
        }
        let mut summary = format!("{} total", self.total);
        if self.passing > 0 {
            summary.push_str(&format!(", {} passing", self.passing));
        }
        if self.warning > 0 {
            summary.push_str(&format!(", {} warning", self.warning));
        }
        if self.critical > 0 {
            summary.push_str(&format!(", {} critical", self.critical));
        }
        summary
    }
}
