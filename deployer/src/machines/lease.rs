//! Machine leases

use chrono::{DateTime, Duration, Utc};
use machines_api::LeaseResponse;

use crate::errors::DeployError;

/// Tolerated clock skew between this host and the control plane
pub const LEASE_CLOCK_SKEW: Duration = Duration::seconds(5);

/// Time-boxed exclusive right to mutate one machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    nonce: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn new(nonce: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            nonce: nonce.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Build a lease from the control plane's acquisition response
    pub fn from_response(machine_id: &str, response: LeaseResponse) -> Result<Self, DeployError> {
        if response.status != "success" {
            return Err(DeployError::Lease {
                machine_id: machine_id.to_string(),
                message: format!(
                    "did not acquire lease, status: {} code: {} message: {}",
                    response.status,
                    response.code.unwrap_or_default(),
                    response.message.unwrap_or_default(),
                ),
            });
        }

        let data = response.data.ok_or_else(|| DeployError::Lease {
            machine_id: machine_id.to_string(),
            message: "missing data from lease response, assuming not successful".to_string(),
        })?;

        let expires_at = DateTime::<Utc>::from_timestamp(data.expires_at, 0);
        match expires_at {
            Some(expires_at) if !data.nonce.is_empty() => Ok(Self::new(data.nonce, expires_at)),
            _ => Err(DeployError::Lease {
                machine_id: machine_id.to_string(),
                message: format!(
                    "malformed lease data (nonce: {:?}, expires_at: {})",
                    data.nonce, data.expires_at
                ),
            }),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A lease is held when it has a nonce and has not expired yet
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        !self.nonce.is_empty() && self.expires_at.is_some_and(|e| e > now)
    }

    pub fn is_held(&self) -> bool {
        self.is_held_at(Utc::now())
    }

    /// Expired for longer than the tolerated clock skew; the control plane
    /// has already dropped it.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now - expires_at > LEASE_CLOCK_SKEW,
            None => true,
        }
    }

    pub fn clear(&mut self) {
        self.nonce.clear();
        self.expires_at = None;
    }
}
