use serde::{Deserialize, Serialize};

/// Lease acquisition request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireLeaseRequest {
    /// Lease duration in seconds
    pub ttl: u64,
}

/// Lease acquisition response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseResponse {
    /// `success` when the lease was granted
    pub status: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub data: Option<LeaseData>,
}

/// Granted lease
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseData {
    pub nonce: String,

    /// Unix timestamp in seconds
    pub expires_at: i64,

    #[serde(default)]
    pub owner: Option<String>,
}
