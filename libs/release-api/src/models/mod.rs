//! Release API models

use serde::{Deserialize, Serialize};

/// Request to record a new release of an app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReleaseInput {
    pub app_id: String,

    /// Platform the release runs on, always `machines` for this tool
    pub platform_version: String,

    /// Upper-cased strategy name, e.g. `ROLLING`
    pub strategy: String,

    /// Image reference deployed by the release
    #[serde(default)]
    pub image: String,

    /// App configuration the release was made from
    #[serde(default)]
    pub definition: serde_json::Value,
}

/// Recorded release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub version: u64,
}

/// Create release response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReleaseResponse {
    pub release: Release,
}
