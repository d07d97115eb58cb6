//! Rollout strategies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::DeployError;

/// How the fleet is walked during a rollout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One machine at a time, each must be started and healthy before the next
    #[default]
    Rolling,

    /// Update everything without waiting, errors are logged and skipped
    Immediate,

    /// Accepted and run as rolling
    Canary,

    /// Accepted and run as rolling
    Bluegreen,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Rolling => "rolling",
            Strategy::Immediate => "immediate",
            Strategy::Canary => "canary",
            Strategy::Bluegreen => "bluegreen",
        }
    }

    /// Name stored on the release record
    pub fn as_release_str(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Whether the rollout waits for each machine to start and pass checks
    pub fn waits_for_machines(&self) -> bool {
        !matches!(self, Strategy::Immediate)
    }

    /// Pick the strategy: explicit flag, then app configuration, then rolling
    pub fn select(flag: Option<&str>, configured: Option<&str>) -> Result<Self, DeployError> {
        let name = flag
            .filter(|s| !s.trim().is_empty())
            .or(configured.filter(|s| !s.trim().is_empty()));

        let strategy = match name {
            Some(name) => name.parse()?,
            None => Strategy::Rolling,
        };

        if matches!(strategy, Strategy::Canary | Strategy::Bluegreen) {
            warn!(
                "{} strategy is not supported by this deployer yet, running a rolling deployment",
                strategy
            );
        }
        Ok(strategy)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rolling" => Ok(Strategy::Rolling),
            "immediate" => Ok(Strategy::Immediate),
            "canary" => Ok(Strategy::Canary),
            "bluegreen" => Ok(Strategy::Bluegreen),
            other => Err(DeployError::Precondition(format!(
                "unsupported deployment strategy '{}'",
                other
            ))),
        }
    }
}
