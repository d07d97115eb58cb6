//! Utility functions

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};

/// Version information for the deployer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Version string recorded in machine metadata
pub fn tool_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Jittered exponential backoff between `min` and `max`, never giving up on its own
pub fn jittered_backoff(min: Duration, max: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: min,
        initial_interval: min,
        max_interval: max,
        multiplier: 2.0,
        randomization_factor: 0.5,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Backoff between polls of the control plane's state and event endpoints
pub fn poll_backoff() -> ExponentialBackoff {
    jittered_backoff(Duration::from_millis(500), Duration::from_secs(2))
}

/// Backoff between health polls, derived from the shortest configured check interval
pub fn health_check_backoff(shortest_interval: Duration) -> ExponentialBackoff {
    jittered_backoff(shortest_interval / 2, shortest_interval * 2)
}

/// Next delay of a backoff, capped at its max interval
pub fn next_delay(backoff: &mut ExponentialBackoff) -> Duration {
    let max = backoff.max_interval;
    backoff.next_backoff().unwrap_or(max).min(max)
}
