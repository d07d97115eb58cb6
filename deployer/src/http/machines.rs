//! Machines control plane client

use std::time::Duration;

use async_trait::async_trait;
use machines_api::{
    AcquireLeaseRequest, LaunchMachineInput, LeaseResponse, Machine, MachineState, Volume,
    METADATA_KEY_PLATFORM_VERSION, PLATFORM_VERSION_V2, PROCESS_GROUP_RELEASE_COMMAND,
};

use crate::api::MachinesApi;
use crate::errors::ApiError;
use crate::http::client::HttpClient;

/// Longest server-side wait the control plane accepts
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Control plane client scoped to one app
#[derive(Clone)]
pub struct MachinesClient {
    http: HttpClient,
    app_name: String,
}

impl MachinesClient {
    pub fn new(http: HttpClient, app_name: impl Into<String>) -> Self {
        Self {
            http,
            app_name: app_name.into(),
        }
    }

    fn machines_path(&self) -> String {
        format!("/apps/{}/machines", self.app_name)
    }

    fn machine_path(&self, machine_id: &str) -> String {
        format!("/apps/{}/machines/{}", self.app_name, machine_id)
    }
}

/// Split platform machines into app machines and the release command machine.
/// Machines deployed by other tooling or on their way out are ignored.
pub fn split_release_command_machine(machines: Vec<Machine>) -> (Vec<Machine>, Option<Machine>) {
    let mut app_machines = Vec::new();
    let mut release_command = None;

    for machine in machines {
        let platform = machine
            .config
            .metadata
            .get(METADATA_KEY_PLATFORM_VERSION)
            .is_some_and(|v| v == PLATFORM_VERSION_V2);
        let leaving = matches!(
            machine.state,
            MachineState::Destroying | MachineState::Destroyed
        );
        if !platform || leaving {
            continue;
        }

        if machine.process_group() == PROCESS_GROUP_RELEASE_COMMAND {
            if release_command.is_none() {
                release_command = Some(machine);
            }
        } else {
            app_machines.push(machine);
        }
    }

    (app_machines, release_command)
}

#[async_trait]
impl MachinesApi for MachinesClient {
    async fn launch(&self, input: LaunchMachineInput) -> Result<Machine, ApiError> {
        self.http.post(&self.machines_path(), &input, None).await
    }

    async fn update(
        &self,
        input: LaunchMachineInput,
        lease_nonce: &str,
    ) -> Result<Machine, ApiError> {
        let id = input
            .id
            .clone()
            .ok_or_else(|| ApiError::Decode("update requires a machine id".to_string()))?;
        self.http
            .post(&self.machine_path(&id), &input, Some(lease_nonce))
            .await
    }

    async fn destroy(&self, machine_id: &str, lease_nonce: &str) -> Result<(), ApiError> {
        self.http
            .delete(
                &self.machine_path(machine_id),
                &[("force", "true".to_string())],
                Some(lease_nonce),
            )
            .await
    }

    async fn get(&self, machine_id: &str) -> Result<Machine, ApiError> {
        self.http.get(&self.machine_path(machine_id)).await
    }

    async fn list_app_machines(&self) -> Result<(Vec<Machine>, Option<Machine>), ApiError> {
        let machines: Vec<Machine> = self.http.get(&self.machines_path()).await?;
        Ok(split_release_command_machine(machines))
    }

    async fn acquire_lease(
        &self,
        machine_id: &str,
        ttl_secs: u64,
    ) -> Result<LeaseResponse, ApiError> {
        let path = format!("{}/lease", self.machine_path(machine_id));
        self.http
            .post(&path, &AcquireLeaseRequest { ttl: ttl_secs }, None)
            .await
    }

    async fn release_lease(&self, machine_id: &str, nonce: &str) -> Result<(), ApiError> {
        let path = format!("{}/lease", self.machine_path(machine_id));
        self.http.delete(&path, &[], Some(nonce)).await
    }

    async fn start(&self, machine_id: &str) -> Result<(), ApiError> {
        let path = format!("{}/start", self.machine_path(machine_id));
        self.http.post_empty(&path).await
    }

    async fn wait(
        &self,
        machine: &Machine,
        state: MachineState,
        timeout: Duration,
    ) -> Result<(), ApiError> {
        let path = format!("{}/wait", self.machine_path(&machine.id));
        let wait = timeout.clamp(Duration::from_secs(1), MAX_WAIT);
        let mut query = vec![
            ("state", state.to_string()),
            ("timeout", wait.as_secs().to_string()),
        ];
        if !machine.instance_id.is_empty() {
            query.push(("instance_id", machine.instance_id.clone()));
        }
        self.http
            .get_with_query(&path, &query, wait + Duration::from_secs(5))
            .await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, ApiError> {
        self.http
            .get(&format!("/apps/{}/volumes", self.app_name))
            .await
    }
}
