//! Error types for machdeploy

use thiserror::Error;

/// Failure talking to a remote API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("{status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Main error type for deployments
#[derive(Error, Debug)]
pub enum DeployError {
    /// Caller misuse, never retried
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("lease error on machine {machine_id}: {message}")]
    Lease { machine_id: String, message: String },

    #[error("error acquiring leases on all machines: {failed} of {total} failed, first error: {first}")]
    FleetLease {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("error releasing leases on machines: {failed} failed, first error: {first}")]
    FleetRelease { failed: usize, first: String },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("error getting machine {machine_id} from api: {source}")]
    Poll {
        machine_id: String,
        #[source]
        source: ApiError,
    },

    #[error("timeout reached waiting for {what} on machine {machine_id}")]
    Timeout { what: String, machine_id: String },

    #[error("canceled while waiting for {what} on machine {machine_id}")]
    Canceled { what: String, machine_id: String },

    #[error("{0}")]
    ConfigResolution(String),

    #[error("release_command machine {machine_id} exited with non-zero status of {exit_code}")]
    ReleaseCommandFailed { machine_id: String, exit_code: i32 },

    #[error("{context}: {source}")]
    ReleaseCommand {
        context: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether the error stems from cancellation or a deadline rather than the remote side
    pub fn is_interrupted(&self) -> bool {
        match self {
            DeployError::Timeout { .. } | DeployError::Canceled { .. } => true,
            DeployError::ReleaseCommand { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            DeployError::Canceled { .. } => true,
            DeployError::ReleaseCommand { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    pub(crate) fn release_command(context: impl Into<String>, source: DeployError) -> Self {
        DeployError::ReleaseCommand {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
