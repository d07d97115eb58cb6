//! API models

mod config;
mod lease;
mod machine;
mod volume;

pub use config::*;
pub use lease::*;
pub use machine::*;
pub use volume::*;

/// Metadata key marking the platform version a machine was deployed with
pub const METADATA_KEY_PLATFORM_VERSION: &str = "platform_version";

/// Metadata key holding the release id
pub const METADATA_KEY_RELEASE_ID: &str = "release_id";

/// Metadata key holding the release version
pub const METADATA_KEY_RELEASE_VERSION: &str = "release_version";

/// Metadata key holding the version of the deploying tool
pub const METADATA_KEY_TOOL_VERSION: &str = "deployer_version";

/// Metadata key holding the process group
pub const METADATA_KEY_PROCESS_GROUP: &str = "process_group";

/// Metadata key flagging managed postgres machines
pub const METADATA_KEY_MANAGED_POSTGRES: &str = "managed-postgres";

pub const PLATFORM_VERSION_V2: &str = "v2";

pub const PROCESS_GROUP_APP: &str = "app";

pub const PROCESS_GROUP_RELEASE_COMMAND: &str = "release_command";

/// Error response
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub status: Option<String>,
}
