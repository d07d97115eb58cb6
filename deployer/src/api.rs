//! Capabilities the deployment core consumes from remote services

use std::time::Duration;

use async_trait::async_trait;
use machines_api::{LaunchMachineInput, LeaseResponse, Machine, MachineState, Volume};
use release_api::{CreateReleaseInput, Release};

use crate::errors::ApiError;

/// Machines control plane, scoped to one app
#[async_trait]
pub trait MachinesApi: Send + Sync {
    /// Create a machine
    async fn launch(&self, input: LaunchMachineInput) -> Result<Machine, ApiError>;

    /// Update a machine; `lease_nonce` proves the caller holds its lease
    async fn update(
        &self,
        input: LaunchMachineInput,
        lease_nonce: &str,
    ) -> Result<Machine, ApiError>;

    /// Destroy a machine
    async fn destroy(&self, machine_id: &str, lease_nonce: &str) -> Result<(), ApiError>;

    async fn get(&self, machine_id: &str) -> Result<Machine, ApiError>;

    /// List the platform machines of the app, split into app machines and the
    /// release command machine
    async fn list_app_machines(&self) -> Result<(Vec<Machine>, Option<Machine>), ApiError>;

    async fn acquire_lease(&self, machine_id: &str, ttl_secs: u64)
        -> Result<LeaseResponse, ApiError>;

    async fn release_lease(&self, machine_id: &str, nonce: &str) -> Result<(), ApiError>;

    async fn start(&self, machine_id: &str) -> Result<(), ApiError>;

    /// Block server-side until the machine reaches `state` or `timeout` elapses
    async fn wait(
        &self,
        machine: &Machine,
        state: MachineState,
        timeout: Duration,
    ) -> Result<(), ApiError>;

    /// List the app's volumes
    async fn list_volumes(&self) -> Result<Vec<Volume>, ApiError>;
}

/// Release record bookkeeping service
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    async fn create_release(&self, input: CreateReleaseInput) -> Result<Release, ApiError>;
}
